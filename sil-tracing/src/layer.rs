// Copyright (C) 2025 The sil-tracing Developers
//
// This file is part of sil-tracing.
//
// sil-tracing is free software: you can redistribute it and/or modify it under the terms of the
// GNU General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// sil-tracing is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with sil-tracing.  If
// not, see <http://www.gnu.org/licenses/>.

//! [sil-tracing](crate) [`Layer`] implementation.
//!
//! [`Layer`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/layer/trait.Layer.html
//!
//! Applications already instrumented with the [`tracing`] macros can route their events into a
//! [`Session`] -- and from there to every configured protocol -- by installing this layer:
//!
//! ```no_run
//! use sil_tracing::{hub, default_session, layer::Layer};
//! use tracing_subscriber::{layer::SubscriberExt, registry::Registry};
//!
//! hub().set_connections("tcp(host=localhost)").unwrap();
//! hub().set_enabled(true);
//! let subscriber = Registry::default().with(Layer::new(default_session()));
//! let _guard = tracing::subscriber::set_default(subscriber);
//! tracing::info!("off to the viewer");
//! ```
//!
//! Only the conventional `message` field is extracted; the event's `tracing` level maps onto
//! the closest diagnostic [`Level`].

use crate::level::Level;
use crate::packet::{LogEntryType, ViewerId};
use crate::session::Session;

use tracing::field::{Field, Visit};
use tracing::Event;
use tracing_subscriber::layer::Context;

/// A [`tracing-subscriber`]-compliant [`Layer`] implementation that forwards [`Event`]s to a
/// [`Session`].
///
/// [`tracing-subscriber`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/index.html
/// [`Layer`]: https://docs.rs/tracing-subscriber/latest/tracing_subscriber/layer/trait.Layer.html
pub struct Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    session: Session,
    // I need the Subscriber implementation type as a type parameter to satisfy the Layer
    // trait. 👇 gets the compiler to shut-up about unused type parameters.
    subscriber_type: std::marker::PhantomData<S>,
}

impl<S> Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    pub fn new(session: Session) -> Self {
        Layer {
            session,
            subscriber_type: std::marker::PhantomData,
        }
    }
}

/// Extracts the conventional `message` field from an event.
struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        }
    }
}

fn map_level(level: &tracing::Level) -> (Level, LogEntryType) {
    match *level {
        tracing::Level::TRACE => (Level::Debug, LogEntryType::Debug),
        tracing::Level::DEBUG => (Level::Verbose, LogEntryType::Verbose),
        tracing::Level::INFO => (Level::Message, LogEntryType::Message),
        tracing::Level::WARN => (Level::Warning, LogEntryType::Warning),
        tracing::Level::ERROR => (Level::Error, LogEntryType::Error),
    }
}

impl<S> tracing_subscriber::layer::Layer<S> for Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // this library records its own failures through `tracing`; feeding those back into a
        // session would loop on a failing protocol
        if event.metadata().target().starts_with("sil_tracing") {
            return;
        }
        let (level, log_entry_type) = map_level(event.metadata().level());
        if !self.session.is_on(level) {
            return;
        }
        let mut visitor = MessageVisitor { message: None };
        event.record(&mut visitor);
        if let Some(message) = visitor.message {
            self.session
                .log_entry(level, &message, log_entry_type, ViewerId::Title, None);
        }
    }
}
