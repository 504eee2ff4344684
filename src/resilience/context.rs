//! Call Context
//! Identifies one logical call in logs and spans

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub operation: String,
    pub request_id: Uuid,
}

impl CallContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            request_id: Uuid::new_v4(),
        }
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new("call")
    }
}
