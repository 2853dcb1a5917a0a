use async_trait::async_trait;
use chorus::sink::OutputSink;
use std::io::Write;

/// Writes reply fragments straight to the terminal.
pub struct StdoutSink;

#[async_trait]
impl OutputSink for StdoutSink {
    async fn push(&self, fragment: &str) {
        let mut stdout = std::io::stdout().lock();
        // A closed stdout only loses output; the conversation carries on
        let _ = stdout.write_all(fragment.as_bytes());
        let _ = stdout.flush();
    }
}
