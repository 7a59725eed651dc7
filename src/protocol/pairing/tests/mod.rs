mod pairings;
mod setup;

use crate::accessory::Accessory;
use crate::protocol::pairing::PairSetup;
use crate::testing::{MockController, TEST_SETUP_CODE};

/// Run Pair-Setup directly against the state machine
async fn paired_controller(accessory: &Accessory) -> MockController {
    let mut setup = PairSetup::new();
    let mut controller = MockController::new();

    let m2 = setup.handle(accessory, &controller.setup_m1()).await;
    let m3 = controller.setup_process_m2(&m2, TEST_SETUP_CODE).unwrap();
    let m4 = setup.handle(accessory, &m3).await;
    let m5 = controller.setup_process_m4(&m4).unwrap();
    let m6 = setup.handle(accessory, &m5).await;
    controller.setup_process_m6(&m6).unwrap();

    assert!(setup.is_complete());
    controller
}

/// Log output captured from a thread-local subscriber
#[derive(Clone, Default)]
struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
