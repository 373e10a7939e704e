use crate::error::{constants, LinkError, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type HandlerFn = dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync + 'static;

/// Request dispatcher for virtual device servers: routes a control-channel
/// command code to a registered handler and returns the reply payload.
/// The engine's built-in data commands are resolved before this map is
/// consulted, so handlers only ever see protocol-specific codes.
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<u32, Box<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register<F>(&self, command: u32, handler: F) -> Result<()>
    where
        F: Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| LinkError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        handlers.insert(command, Box::new(handler));
        Ok(())
    }

    /// Whether any handler is registered for `command`.
    pub fn handles(&self, command: u32) -> bool {
        self.handlers
            .read()
            .map(|h| h.contains_key(&command))
            .unwrap_or(false)
    }

    pub fn dispatch(&self, command: u32, payload: &[u8]) -> Result<Vec<u8>> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| LinkError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string()))?;

        handlers
            .get(&command)
            .ok_or_else(|| {
                LinkError::Custom(format!(
                    "{} {command:#x}",
                    constants::ERR_UNKNOWN_COMMAND
                ))
            })
            .and_then(|handler| handler(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_routes_by_command() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(0x0100, |payload| {
                let mut out = payload.to_vec();
                out.reverse();
                Ok(out)
            })
            .unwrap();

        assert!(dispatcher.handles(0x0100));
        assert_eq!(dispatcher.dispatch(0x0100, &[1, 2, 3]).unwrap(), vec![3, 2, 1]);
    }

    #[test]
    fn test_unknown_command_is_error() {
        let dispatcher = Dispatcher::new();
        assert!(!dispatcher.handles(0x0200));
        assert!(dispatcher.dispatch(0x0200, &[]).is_err());
    }

    #[test]
    fn test_handler_failure_propagates() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(0x0300, |_| Err(LinkError::Custom("device offline".into())))
            .unwrap();
        assert!(matches!(
            dispatcher.dispatch(0x0300, &[]),
            Err(LinkError::Custom(_))
        ));
    }
}
