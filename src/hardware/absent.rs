use async_trait::async_trait;

use crate::hardware::{LinkReport, ProbeError, RadioError, RadioLink, TemperatureProbe};

/// Stand-in for a radio that failed to initialize. Every send is unreachable.
#[derive(Debug, Clone)]
pub struct AbsentRadio {
    reason: String,
}

impl AbsentRadio {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl RadioLink for AbsentRadio {
    async fn transmit(&mut self, _payload: &[u8]) -> Result<LinkReport, RadioError> {
        Err(RadioError::Unavailable(self.reason.clone()))
    }
}

/// Stand-in for a disabled or missing temperature probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbsentProbe;

impl TemperatureProbe for AbsentProbe {
    fn read_celsius(&mut self) -> Result<f32, ProbeError> {
        Err(ProbeError::Unavailable)
    }
}
