pub mod config;
pub mod countdown;
pub mod gateway;
pub mod history;
pub mod track;

/// Single-threaded runtime for commands that talk to the gateway.
pub(crate) fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}
