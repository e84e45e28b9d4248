use super::{Handler, HandlerFactory};
use crate::Payload;
use crate::item::Item;
use async_trait::async_trait;
use conveyor_shared::ConveyorResult;
use std::sync::Arc;

/// Handler that accepts every item and does nothing.
///
/// Installed as the default error and final stage when the caller did not
/// register one.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyHandler;

impl EmptyHandler {
    pub fn factory<T: Payload>() -> HandlerFactory<T> {
        Arc::new(|_name: &str| Ok(Box::new(EmptyHandler) as Box<dyn Handler<T>>))
    }
}

#[async_trait]
impl<T: Payload> Handler<T> for EmptyHandler {
    async fn run(&self, _item: &Item<T>) -> ConveyorResult<()> {
        Ok(())
    }
}
