use std::io::Write;

use anyhow::Result;

use crate::event::Event;

/// Destination of the events produced while replaying a trace.
pub trait EventSink {
    fn emit(&mut self, event: &Event) -> Result<()>;
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Discards every event.
pub struct EmptySink {}

impl EmptySink {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for EmptySink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EmptySink {
    fn emit(&mut self, _: &Event) -> Result<()> {
        Ok(())
    }
}

/// Writes one line per event.
pub struct WriterSink<W> {
    inner: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> EventSink for WriterSink<W> {
    fn emit(&mut self, event: &Event) -> Result<()> {
        writeln!(self.inner, "{event}")?;
        Ok(())
    }
    fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn lines(&self) -> Vec<String> {
        self.events.iter().map(|e| e.to_string()).collect()
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, event: &Event) -> Result<()> {
        self.events.push(event.clone());
        Ok(())
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: &Event) -> Result<()> {
        (**self).emit(event)
    }
    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}
