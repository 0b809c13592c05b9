//! Scripted [`ModelBoundary`] fake shared by unit tests.

use crate::api::{
    BoundaryFuture, CancelSignal, CompletionRequest, EventCallback, ExchangeRequest,
    ModelBoundary, ModelCapabilities, ProviderEvent,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// A boundary that replays scripted responses and counts calls.
///
/// Exchanges and completions are consumed FIFO. An unscripted exchange
/// yields a bare `Done`; an unscripted completion returns an error.
#[derive(Default)]
pub(crate) struct ScriptedBoundary {
    exchanges: Mutex<VecDeque<Vec<ProviderEvent>>>,
    completions: Mutex<VecDeque<Result<String, String>>>,
    exchange_calls: AtomicU32,
    completion_calls: AtomicU32,
    capabilities: ModelCapabilities,
}

impl ScriptedBoundary {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_capabilities(mut self, capabilities: ModelCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Queue the event list for the next streaming exchange.
    pub(crate) fn with_exchange(self, events: Vec<ProviderEvent>) -> Self {
        self.exchanges.lock().unwrap().push_back(events);
        self
    }

    /// Queue the response for the next one-shot completion.
    pub(crate) fn with_completion(self, response: Result<String, String>) -> Self {
        self.completions.lock().unwrap().push_back(response);
        self
    }

    pub(crate) fn exchange_calls(&self) -> u32 {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn completion_calls(&self) -> u32 {
        self.completion_calls.load(Ordering::SeqCst)
    }
}

impl ModelBoundary for ScriptedBoundary {
    fn capabilities(&self) -> ModelCapabilities {
        self.capabilities
    }

    fn stream_exchange<'a>(
        &'a self,
        _request: ExchangeRequest,
        cancel: CancelSignal,
        mut on_event: EventCallback<'a>,
    ) -> BoundaryFuture<'a, Vec<ProviderEvent>> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        let events = self
            .exchanges
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![ProviderEvent::Done]);
        Box::pin(async move {
            let mut relayed = Vec::with_capacity(events.len());
            for event in events {
                // A real boundary stops relaying model-originated events
                // once the signal fires.
                if cancel.is_cancelled() {
                    break;
                }
                on_event(&event);
                relayed.push(event);
            }
            Ok(relayed)
        })
    }

    fn complete<'a>(
        &'a self,
        _request: CompletionRequest,
        _cancel: CancelSignal,
    ) -> BoundaryFuture<'a, String> {
        self.completion_calls.fetch_add(1, Ordering::SeqCst);
        let response = self
            .completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("no scripted completion".to_string()));
        Box::pin(async move { response })
    }
}
