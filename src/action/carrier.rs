//! `carrier_in` / `carrier_out`: single driver commands, no validation.

use super::request::ActionRequest;
use super::result::StepResult;
use crate::driver::PlateReader;
use anyhow::Result;
use tracing::info;

/// Retracts the plate carrier. A driver fault escapes as an unexpected failure.
pub async fn carrier_in(reader: &dyn PlateReader, request: &mut ActionRequest) -> Result<()> {
    reader.carrier_in().await?;
    info!("carrier moved in");
    request.result = StepResult::succeeded("Moved Carrier In");
    Ok(())
}

/// Extends the plate carrier. A driver fault escapes as an unexpected failure.
pub async fn carrier_out(reader: &dyn PlateReader, request: &mut ActionRequest) -> Result<()> {
    reader.carrier_out().await?;
    info!("carrier moved out");
    request.result = StepResult::succeeded("Moved Carrier Out");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::result::StepStatus;
    use crate::driver::{DriverCall, MockPlateReader};
    use serde_json::Map;

    #[tokio::test]
    async fn test_carrier_commands_issue_one_driver_call() {
        let reader = MockPlateReader::new();

        let mut request = ActionRequest::new("carrier_in", Map::new()).unwrap();
        carrier_in(&reader, &mut request).await.unwrap();
        assert_eq!(request.result.action_msg, "Moved Carrier In");

        let mut request = ActionRequest::new("carrier_out", Map::new()).unwrap();
        carrier_out(&reader, &mut request).await.unwrap();
        assert_eq!(request.result.action_response, StepStatus::Succeeded);

        assert_eq!(
            reader.journal(),
            vec![DriverCall::CarrierIn, DriverCall::CarrierOut]
        );
    }

    #[tokio::test]
    async fn test_driver_fault_propagates() {
        let reader = MockPlateReader::new().with_carrier_error("carrier jammed");
        let mut request = ActionRequest::new("carrier_out", Map::new()).unwrap();

        let err = carrier_out(&reader, &mut request).await.unwrap_err();
        assert_eq!(err.to_string(), "carrier jammed");
        assert_eq!(request.result.action_response, StepStatus::Idle);
    }
}
