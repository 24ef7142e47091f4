use std::collections::HashMap;
use std::sync::Arc;

use sms_core::{TransportClient, TransportType};

/// Transport implementations keyed by the provider type they serve.
///
/// Adding a provider kind means registering one more client here; the
/// dispatch loop stays unchanged.
#[derive(Default, Clone)]
pub struct TransportSet {
    map: Arc<HashMap<TransportType, Arc<dyn TransportClient>>>,
}

impl TransportSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, client: Arc<dyn TransportClient>) -> Self {
        let mut m = (*self.map).clone();
        m.insert(client.transport_type(), client);
        self.map = Arc::new(m);
        self
    }

    pub fn get(&self, transport_type: TransportType) -> Option<Arc<dyn TransportClient>> {
        self.map.get(&transport_type).cloned()
    }
}
