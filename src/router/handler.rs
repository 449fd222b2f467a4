//! Server handlers that feed the router.

use std::sync::Arc;

use super::Router;
use crate::config::Family;
use crate::envelope::{
    CommandRequest, CommandResult, Envelope, ErrorKind, HandlerRegistry, ServerHandler,
    COMMAND_HANDLER,
};

/// Forwards command envelopes to the router and replies with the result.
///
/// A handler bound to a family only reaches devices of that family.
pub struct CommandHandler {
    router: Arc<Router>,
    family: Option<Family>,
}

impl CommandHandler {
    pub fn new(router: Arc<Router>) -> CommandHandler {
        CommandHandler { router, family: None }
    }

    pub fn for_family(router: Arc<Router>, family: Family) -> CommandHandler {
        CommandHandler {
            router,
            family: Some(family),
        }
    }
}

impl ServerHandler for CommandHandler {
    fn process(&self, envelope: &Envelope) -> Option<Envelope> {
        let request = CommandRequest::from_envelope(envelope);
        let result = match self.family {
            Some(family) if self.router.family(&request.device_address) != Some(family) => {
                CommandResult::error(
                    &request,
                    ErrorKind::UnknownDevice,
                    format!("No {} device {}", family.category(), request.device_address),
                )
            }
            _ => self.router.handle_command(&request),
        };
        Some(result.to_envelope(&envelope.handler))
    }
}

/// The server's handler registry: `command` for every device, plus one name
/// per device family.
pub fn handlers(router: Arc<Router>) -> HandlerRegistry<Arc<dyn ServerHandler>> {
    let mut registry: HandlerRegistry<Arc<dyn ServerHandler>> = HandlerRegistry::new();
    registry.register(COMMAND_HANDLER, Arc::new(CommandHandler::new(router.clone())));
    for family in [Family::Light, Family::Fire] {
        registry.register(
            family.category(),
            Arc::new(CommandHandler::for_family(router.clone(), family)),
        );
    }
    registry
}
