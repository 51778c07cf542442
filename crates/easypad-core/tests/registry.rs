use easypad_core::backend::mock::{Dispatched, Mock, MockBehavior};
use easypad_core::{Buttons, Config, DeviceId, Gamepads, Lifecycle};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;

fn pads(behavior: MockBehavior) -> (Arc<Mock>, UnboundedReceiver<Dispatched>, Gamepads) {
    let (mock, rx) = Mock::with_reports(behavior);
    let pads = Gamepads::with_backend(mock.clone(), &Config::default(), Handle::current());
    (mock, rx, pads)
}

async fn settle(pads: &Gamepads, id: DeviceId) -> Lifecycle {
    let mut rx = pads.registry().watch(id).unwrap();
    let state = rx.wait_for(|s| s.is_settled()).await.unwrap();
    *state
}

#[tokio::test]
async fn ids_are_unique_and_increasing() {
    let (_mock, _rx, pads) = pads(MockBehavior::default());
    let mut last = DeviceId(0);
    for _ in 0..5 {
        let id = pads.create().unwrap();
        assert!(id > last);
        last = id;
    }
    assert!(pads.destroy(DeviceId(5)));
    assert_eq!(pads.create(), Some(DeviceId(6)));
    assert_eq!(pads.list(), vec![DeviceId(1), DeviceId(2), DeviceId(3), DeviceId(4), DeviceId(6)]);
}

#[tokio::test]
async fn press_release_and_redundant_release() {
    let (_mock, mut rx, pads) = pads(MockBehavior::default());
    let id = pads.create().unwrap();

    assert!(pads.button_down(id, 3));
    assert_eq!(rx.recv().await.unwrap().report.buttons(), Buttons::Y);
    assert!(pads.button_up(id, 3));
    assert!(rx.recv().await.unwrap().report.buttons().is_empty());
    assert!(pads.button_up(id, 3));
    assert!(rx.recv().await.unwrap().report.buttons().is_empty());
}

#[tokio::test]
async fn sticks_verbatim_triggers_remapped() {
    let (_mock, mut rx, pads) = pads(MockBehavior::default());
    let id = pads.create().unwrap();

    assert!(pads.set_axis(id, 2, -12345));
    assert_eq!(rx.recv().await.unwrap().report.stick(2), Some(-12345));

    for (value, expected) in [(i16::MIN, 0u8), (-1, 128), (0, 128), (127, 128), (128, 129), (i16::MAX, 255)] {
        assert!(pads.set_axis(id, 5, value));
        assert_eq!(rx.recv().await.unwrap().report.right_trigger(), expected, "value {value}");
    }
}

#[tokio::test]
async fn unknown_ids_return_false() {
    let (_mock, mut rx, pads) = pads(MockBehavior::default());
    let ghost = DeviceId(42);
    assert!(!pads.button_down(ghost, 0));
    assert!(!pads.button_up(ghost, 0));
    assert!(!pads.set_axis(ghost, 0, 1));
    assert!(!pads.destroy(ghost));
    assert!(!pads.is_active(ghost));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn destroyed_ids_are_dead() {
    let (mock, _rx, pads) = pads(MockBehavior::default());
    let id = pads.create().unwrap();
    assert_eq!(settle(&pads, id).await, Lifecycle::Activated);
    assert!(pads.is_active(id));

    assert!(pads.destroy(id));
    assert!(!pads.is_active(id));
    assert!(!pads.is_initialized(id));
    assert!(!pads.button_down(id, 0));
    assert!(!pads.set_axis(id, 0, 0));
    assert!(!pads.destroy(id));
    assert_eq!(mock.live_count(), 0);
}

#[tokio::test]
async fn documented_report_bytes() {
    let (_mock, mut rx, pads) = pads(MockBehavior::default());
    let id = pads.create().unwrap();
    assert!(pads.button_down(id, 0));
    assert!(pads.set_axis(id, 0, 100));
    assert!(pads.set_axis(id, 1, -100));
    assert!(pads.set_axis(id, 4, 32767));
    assert!(pads.set_axis(id, 5, 0));

    let mut last = None;
    for _ in 0..5 {
        last = Some(rx.recv().await.unwrap().report);
    }
    assert_eq!(
        last.unwrap().as_bytes(),
        &[0x01, 0x00, 0x64, 0x00, 0x9C, 0xFF, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x80]
    );
}

#[tokio::test]
async fn create_press_trigger_destroy_create() {
    let (_mock, mut rx, pads) = pads(MockBehavior::default());
    let id = pads.create().unwrap();
    assert_eq!(id, DeviceId(1));
    assert!(pads.button_down(id, 0));
    rx.recv().await.unwrap();
    assert!(pads.set_axis(id, 4, 32767));
    assert_eq!(rx.recv().await.unwrap().report.left_trigger(), 0xFF);
    assert!(pads.destroy(id));
    assert!(!pads.is_active(id));
    assert_eq!(pads.create(), Some(DeviceId(2)));
}

#[tokio::test]
async fn install_enables_support_without_restart() {
    let (_mock, _rx, pads) = pads(MockBehavior { unsupported: true, ..Default::default() });
    assert!(!pads.is_supported());
    assert_eq!(pads.create(), None);

    assert!(pads.install().await);
    assert!(pads.is_supported());
    // the failed create above still consumed id 1
    assert_eq!(pads.create(), Some(DeviceId(2)));
    assert!(pads.install().await);
}

#[tokio::test]
async fn activation_failure_is_observed_later() {
    let (_mock, _rx, pads) = pads(MockBehavior { fail_activation: true, ..Default::default() });
    let id = pads.create().unwrap();
    assert_eq!(settle(&pads, id).await, Lifecycle::Failed);
    assert!(!pads.is_active(id));
    assert!(!pads.is_initialized(id));
    // the handle stays valid until destroyed
    assert_eq!(pads.list(), vec![id]);
    assert!(pads.destroy(id));
}

#[tokio::test]
async fn mutations_before_activation_are_accepted() {
    let (_mock, mut rx, pads) = pads(MockBehavior {
        activation_delay: Duration::from_millis(50),
        ..Default::default()
    });
    let id = pads.create().unwrap();
    assert_eq!(pads.lifecycle(id), Some(Lifecycle::Activating));
    assert!(pads.button_down(id, 1));
    let early = rx.recv().await.unwrap();
    assert!(!early.active);
    assert_eq!(early.report.buttons(), Buttons::B);

    assert_eq!(settle(&pads, id).await, Lifecycle::Activated);
    assert!(pads.button_down(id, 2));
    let late = rx.recv().await.unwrap();
    assert!(late.active);
    assert_eq!(late.report.buttons(), Buttons::B | Buttons::X);
}

#[tokio::test(start_paused = true)]
async fn slow_activation_times_out() {
    let (mock, rx) = Mock::with_reports(MockBehavior {
        activation_delay: Duration::from_secs(30),
        ..Default::default()
    });
    drop(rx);
    let config = Config { activation_timeout_ms: 1_000, ..Default::default() };
    let pads = Gamepads::with_backend(mock, &config, Handle::current());
    let id = pads.create().unwrap();
    assert_eq!(settle(&pads, id).await, Lifecycle::Failed);
}

#[tokio::test]
async fn destroy_cancels_pending_activation() {
    let (mock, _rx, pads) = pads(MockBehavior { hang_activation: true, ..Default::default() });
    let id = pads.create().unwrap();
    let mut watch = pads.registry().watch(id).unwrap();
    tokio::task::yield_now().await;
    assert!(pads.is_initialized(id));
    assert!(!pads.is_active(id));

    assert!(pads.destroy(id));
    assert_eq!(*watch.wait_for(|s| *s == Lifecycle::Destroyed).await.unwrap(), Lifecycle::Destroyed);

    for _ in 0..10 {
        if mock.abandoned_activations() == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(mock.abandoned_activations(), 1);
    assert_eq!(mock.live_count(), 0);
}
