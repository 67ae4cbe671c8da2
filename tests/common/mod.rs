//! A small reimplementation of the teacher's
//! `near_o11y::testonly::init_test_logger()`, since `near_o11y` itself is
//! not part of this crate's dependency closure (see `SPEC_FULL.md` §10.1).
//! Installs a `tracing-subscriber` `fmt` layer once per test binary so
//! `tracing` events emitted by the interpreter and scope tree show up when
//! a test is run with `--nocapture`.

use std::sync::Once;

static INIT: Once = Once::new();

pub fn init_test_logger() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}
