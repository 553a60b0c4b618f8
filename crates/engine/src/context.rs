//! Session context.
//!
//! The context is the opaque handle a front end supplies with every
//! command: the authenticated user, the currently open resource (held
//! via a registry pin) and the engine options. The engine reads
//! permission and current-resource state from it and never persists it.

use uuid::Uuid;

use talus_core::Options;

use crate::registry::{PinHandle, SessionId};

/// One front-end session.
pub struct Context {
    session: SessionId,
    user: String,
    open: Option<OpenResource>,
    options: Options,
}

struct OpenResource {
    name: String,
    /// Held for the lifetime of the open reference; dropping it releases
    /// the registry pin.
    _pin: PinHandle,
}

impl Context {
    /// Creates a session for the given user.
    pub fn new(user: impl Into<String>, options: Options) -> Self {
        Context {
            session: Uuid::new_v4(),
            user: user.into(),
            open: None,
            options,
        }
    }

    /// Session identity used by the pin table.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// The authenticated user.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Name of the currently open resource, if any.
    pub fn open_name(&self) -> Option<&str> {
        self.open.as_ref().map(|open| open.name.as_str())
    }

    /// Engine options visible to this session.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Replaces the open resource; the previous pin, if any, is released.
    pub(crate) fn set_open(&mut self, name: String, pin: PinHandle) {
        self.open = Some(OpenResource { name, _pin: pin });
    }

    /// Closes the open resource, releasing its pin. Returns its name.
    pub(crate) fn clear_open(&mut self) -> Option<String> {
        self.open.take().map(|open| open.name)
    }
}
