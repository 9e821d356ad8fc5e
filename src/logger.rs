/// Initializes the crate's tracing subscriber.
///
/// Mirrors the teacher's `logger::init`/`init_test` split: compact,
/// no-target, no-timestamp formatting for interactive use, full output for
/// tests so a failing assertion's surrounding log lines are legible.
use anyhow::Result;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub fn init(level: Level) {
    init_logger(level, false).expect("failed to initialize logger");
}

pub fn init_test() {
    let _ = init_logger(Level::DEBUG, true);
}

fn init_logger(level: Level, with_target: bool) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .compact()
        .with_target(with_target)
        .with_max_level(level)
        .finish();
    // Safe to ignore: repeated init (e.g. across multiple #[test]s in one
    // binary) is expected and not an error.
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}
