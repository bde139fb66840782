//! Command lifecycle against an in-process broker.

use std::sync::Arc;

use iotagent_commands::CommandTracker;
use iotagent_core::{Attribute, CommandStatus, Device, Error};
use iotagent_devices::DeviceRegistry;
use iotagent_testing::{RecordingBroker, agent_config};

struct Fixture {
    registry: DeviceRegistry,
    broker: Arc<RecordingBroker>,
    tracker: CommandTracker,
    robot: Device,
}

async fn fixture() -> Fixture {
    let config = agent_config(Default::default());
    let registry = DeviceRegistry::in_memory(config.catalog());
    let broker = Arc::new(RecordingBroker::new());
    let tracker = CommandTracker::new(registry.clone(), broker.clone());

    let robot = registry
        .create(Device::new("r2d2", "Robot").with_scope("smartGondor", "/gardens"))
        .await
        .unwrap();

    Fixture {
        registry,
        broker,
        tracker,
        robot,
    }
}

#[tokio::test]
async fn test_record_pending_stores_invocation() {
    let f = fixture().await;
    let command = Attribute::new("position", "Array", "[28, -104, 23]");

    let device = f
        .tracker
        .record_pending(&f.robot.key(), std::slice::from_ref(&command))
        .await
        .unwrap();

    let invocation = &device.command_status["position"];
    assert_eq!(invocation.status, CommandStatus::Pending);
    assert_eq!(invocation.value.as_deref(), Some("[28, -104, 23]"));

    let stored = f.registry.get(&f.robot.key()).await.unwrap();
    assert_eq!(stored.command_status["position"].status, CommandStatus::Pending);
}

#[tokio::test]
async fn test_publish_pending_pushes_status() {
    let f = fixture().await;
    let command = Attribute::new("position", "Array", "[28, -104, 23]");

    f.tracker
        .publish_pending(&f.robot, std::slice::from_ref(&command))
        .await
        .unwrap();

    let updates = f.broker.updates_for("r2d2:Robot");
    assert_eq!(
        updates,
        vec![vec![Attribute::new("position_status", "commandStatus", "PENDING")]]
    );
}

#[tokio::test]
async fn test_report_result_finishes_command() {
    let f = fixture().await;
    f.tracker
        .record_pending(
            &f.robot.key(),
            &[Attribute::new("position", "Array", "[28, -104, 23]")],
        )
        .await
        .unwrap();

    let invocation = f
        .tracker
        .report_result(
            &f.robot.key(),
            "Robot",
            "position",
            "[72, 368, 1]",
            CommandStatus::Finished,
        )
        .await
        .unwrap();
    assert_eq!(invocation.status, CommandStatus::Finished);
    assert_eq!(invocation.result.as_deref(), Some("[72, 368, 1]"));
    assert_eq!(invocation.value.as_deref(), Some("[28, -104, 23]"));

    let updates = f.broker.updates_for("r2d2:Robot");
    assert_eq!(
        updates,
        vec![vec![
            Attribute::new("position", "Array", "[72, 368, 1]"),
            Attribute::new("position_status", "commandStatus", "FINISHED"),
        ]]
    );

    let stored = f.registry.get(&f.robot.key()).await.unwrap();
    assert_eq!(stored.command_status["position"].status, CommandStatus::Finished);
}

#[tokio::test]
async fn test_report_result_without_pending_starts_record() {
    let f = fixture().await;

    let invocation = f
        .tracker
        .report_result(&f.robot.key(), "Robot", "position", "oops", CommandStatus::Error)
        .await
        .unwrap();
    assert_eq!(invocation.status, CommandStatus::Error);
    assert!(invocation.value.is_none());
}

#[tokio::test]
async fn test_report_result_rejects_pending_status() {
    let f = fixture().await;
    let err = f
        .tracker
        .report_result(&f.robot.key(), "Robot", "position", "x", CommandStatus::Pending)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidStatus(_)));
    assert!(f.broker.updates().is_empty());
}

#[tokio::test]
async fn test_report_result_unknown_command() {
    let f = fixture().await;
    let err = f
        .tracker
        .report_result(&f.robot.key(), "Robot", "dance", "x", CommandStatus::Finished)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidCommand(name) if name == "dance"));

    let stored = f.registry.get(&f.robot.key()).await.unwrap();
    assert!(stored.command_status.is_empty());
}

#[tokio::test]
async fn test_report_result_wrong_type_is_not_found() {
    let f = fixture().await;
    let err = f
        .tracker
        .report_result(&f.robot.key(), "Light", "position", "x", CommandStatus::Finished)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_report_result_push_failure_is_returned() {
    let f = fixture().await;
    f.broker.fail_updates(true);

    let err = f
        .tracker
        .report_result(
            &f.robot.key(),
            "Robot",
            "position",
            "[72, 368, 1]",
            CommandStatus::Finished,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Registration(_)));

    // The registry keeps the reported state.
    let stored = f.registry.get(&f.robot.key()).await.unwrap();
    assert_eq!(stored.command_status["position"].status, CommandStatus::Finished);
}

#[tokio::test]
async fn test_new_invocation_replaces_finished_one() {
    let f = fixture().await;
    let key = f.robot.key();
    f.tracker
        .record_pending(&key, &[Attribute::new("position", "Array", "[1, 1, 1]")])
        .await
        .unwrap();
    f.tracker
        .report_result(&key, "Robot", "position", "ok", CommandStatus::Finished)
        .await
        .unwrap();

    let device = f
        .tracker
        .record_pending(&key, &[Attribute::new("position", "Array", "[2, 2, 2]")])
        .await
        .unwrap();
    let invocation = &device.command_status["position"];
    assert_eq!(invocation.status, CommandStatus::Pending);
    assert_eq!(invocation.value.as_deref(), Some("[2, 2, 2]"));
    assert!(invocation.result.is_none());
}
