pub mod duplicate;
pub mod process;
pub mod progress;
pub mod queue;
pub mod scheduler;
pub mod status_sync;
pub mod url_parser;
pub mod worker;
pub mod ytdlp;
