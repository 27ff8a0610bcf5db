//! Registered-node views: plain `{id → record}` maps with an activity
//! predicate, no back-references into the containing network.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core_api::PublicNodeApi;

/// A node goes inactive after this long without a heartbeat.
pub const ACTIVE_TTL: Duration = Duration::from_secs(10);

/// One registered relay or client.
#[derive(Debug, Clone)]
pub struct NodeView {
    pub info: PublicNodeApi,
    last_heartbeat: Instant,
}

impl NodeView {
    pub fn new(info: PublicNodeApi) -> Self {
        NodeView { info, last_heartbeat: Instant::now() }
    }

    pub fn update(&mut self, info: PublicNodeApi) {
        self.info = info;
        self.last_heartbeat = Instant::now();
    }

    pub fn is_active(&self, now: Instant) -> bool {
        now.duration_since(self.last_heartbeat) < ACTIVE_TTL
    }
}

/// The directory's registry for one node kind.
#[derive(Debug, Default)]
pub struct Registry {
    nodes: HashMap<u32, NodeView>,
}

impl Registry {
    /// Insert or refresh a node record.
    pub fn upsert(&mut self, info: PublicNodeApi) {
        match self.nodes.get_mut(&info.id) {
            Some(view) => view.update(info),
            None => {
                self.nodes.insert(info.id, NodeView::new(info));
            }
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Snapshot of every active node with a usable address.
    pub fn active(&self, now: Instant) -> Vec<PublicNodeApi> {
        let mut nodes: Vec<PublicNodeApi> = self
            .nodes
            .values()
            .filter(|view| view.is_active(now) && !view.info.address.is_empty())
            .map(|view| view.info.clone())
            .collect();
        nodes.sort_by_key(|node| node.id);
        nodes
    }

    pub fn active_count(&self, now: Instant) -> usize {
        self.nodes.values().filter(|view| view.is_active(now)).count()
    }
}
