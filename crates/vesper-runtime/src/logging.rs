//! `tracing`/`tracing-subscriber` setup for the runtime's logging builder.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Span event configuration, useful here for watching a Target's
/// worker-thread lifecycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanEvents {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

impl SpanEvents {
    pub const NONE: Self = Self {
        new: false,
        enter: false,
        exit: false,
        close: false,
    };
    pub const LIFECYCLE: Self = Self {
        new: true,
        enter: false,
        exit: false,
        close: true,
    };
    pub const FULL: Self = Self {
        new: true,
        enter: true,
        exit: true,
        close: true,
    };

    fn to_fmt_span(self) -> fmt::format::FmtSpan {
        let mut span = fmt::format::FmtSpan::NONE;
        if self.new {
            span |= fmt::format::FmtSpan::NEW;
        }
        if self.enter {
            span |= fmt::format::FmtSpan::ENTER;
        }
        if self.exit {
            span |= fmt::format::FmtSpan::EXIT;
        }
        if self.close {
            span |= fmt::format::FmtSpan::CLOSE;
        }
        span
    }
}

/// Initializes logging with sensible defaults for this workspace's crates.
pub fn init_vesper() {
    LoggingBuilder::new().init();
}

fn default_vesper_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info")
            .add_directive("vesper_runtime=info".parse().unwrap())
            .add_directive("vesper_plugin=info".parse().unwrap())
            .add_directive("vesper_core=info".parse().unwrap())
            .add_directive("vesper_config=info".parse().unwrap())
    })
}

/// A builder for configuring `tracing-subscriber` output, used by the `vesper`
/// binary at startup.
#[derive(Default)]
pub struct LoggingBuilder {
    directives: Vec<String>,
    level: Option<tracing::Level>,
    span_events: SpanEvents,
    with_target: bool,
    with_thread_ids: bool,
    with_file: bool,
    with_line_number: bool,
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.level = Some(level);
        self
    }

    pub fn directive(mut self, directive: &str) -> Self {
        self.directives.push(directive.to_string());
        self
    }

    pub fn with_span_events(mut self, events: SpanEvents) -> Self {
        self.span_events = events;
        self
    }

    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    pub fn with_thread_ids(mut self, enabled: bool) -> Self {
        self.with_thread_ids = enabled;
        self
    }

    pub fn with_file(mut self, enabled: bool) -> Self {
        self.with_file = enabled;
        self
    }

    pub fn with_line_number(mut self, enabled: bool) -> Self {
        self.with_line_number = enabled;
        self
    }

    fn build_filter(&self) -> EnvFilter {
        if self.level.is_none() && self.directives.is_empty() {
            return default_vesper_filter();
        }
        let base = match self.level {
            Some(tracing::Level::TRACE) => "trace",
            Some(tracing::Level::DEBUG) => "debug",
            Some(tracing::Level::WARN) => "warn",
            Some(tracing::Level::ERROR) => "error",
            _ => "info",
        };
        let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base));
        for directive in &self.directives {
            if let Ok(d) = directive.parse() {
                filter = filter.add_directive(d);
            }
        }
        filter
    }

    fn build_fmt_layer<S>(&self) -> fmt::Layer<S>
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        fmt::layer()
            .with_span_events(self.span_events.to_fmt_span())
            .with_target(self.with_target)
            .with_thread_ids(self.with_thread_ids)
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
    }

    pub fn init(self) {
        let filter = self.build_filter();
        tracing_subscriber::registry()
            .with(self.build_fmt_layer())
            .with(filter)
            .init();
    }

    pub fn try_init(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let filter = self.build_filter();
        tracing_subscriber::registry()
            .with(self.build_fmt_layer())
            .with(filter)
            .try_init()
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
    }
}
