use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::providers::{PartStream, ProviderError};

use super::types::ContentPart;

/// One step of a [`PartSequence`]. The last three are terminal.
#[derive(Debug)]
pub enum PartEvent {
    Part(ContentPart),
    Ended,
    Failed(ProviderError),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminal {
    Ended,
    Failed,
    Cancelled,
}

/// Cancellable wrapper over a provider's part stream.
///
/// Once a terminal event has been returned, every further call repeats the terminal kind
/// without polling the provider again (a failure is reported once, then reads as `Ended`).
pub struct PartSequence {
    inner: Option<PartStream>,
    cancel: CancellationToken,
    terminal: Option<Terminal>,
}

impl PartSequence {
    pub fn new(inner: PartStream, cancel: CancellationToken) -> Self {
        Self {
            inner: Some(inner),
            cancel,
            terminal: None,
        }
    }

    pub async fn next(&mut self) -> PartEvent {
        if let Some(t) = self.terminal {
            return match t {
                Terminal::Cancelled => PartEvent::Cancelled,
                Terminal::Ended | Terminal::Failed => PartEvent::Ended,
            };
        }
        let Some(inner) = self.inner.as_mut() else {
            return PartEvent::Ended;
        };

        let event = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => PartEvent::Cancelled,
            item = inner.next() => match item {
                Some(Ok(part)) => PartEvent::Part(part),
                Some(Err(ProviderError::Cancelled)) => PartEvent::Cancelled,
                Some(Err(e)) => PartEvent::Failed(e),
                None => PartEvent::Ended,
            },
        };

        let terminal = match &event {
            PartEvent::Part(_) => None,
            PartEvent::Ended => Some(Terminal::Ended),
            PartEvent::Failed(_) => Some(Terminal::Failed),
            PartEvent::Cancelled => Some(Terminal::Cancelled),
        };
        if terminal.is_some() {
            // 终止后立即释放上游流
            self.inner = None;
            self.terminal = terminal;
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::time::Duration;

    fn parts(items: Vec<Result<ContentPart, ProviderError>>) -> PartStream {
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn ends_normally_after_last_part() {
        let mut seq = PartSequence::new(
            parts(vec![Ok(ContentPart::text("a")), Ok(ContentPart::text("b"))]),
            CancellationToken::new(),
        );
        assert!(matches!(seq.next().await, PartEvent::Part(ContentPart::Text(t)) if t == "a"));
        assert!(matches!(seq.next().await, PartEvent::Part(_)));
        assert!(matches!(seq.next().await, PartEvent::Ended));
        assert!(matches!(seq.next().await, PartEvent::Ended));
    }

    #[tokio::test]
    async fn failure_is_terminal() {
        let mut seq = PartSequence::new(
            parts(vec![
                Ok(ContentPart::text("a")),
                Err(ProviderError::Decode("bad".into())),
                Ok(ContentPart::text("never")),
            ]),
            CancellationToken::new(),
        );
        assert!(matches!(seq.next().await, PartEvent::Part(_)));
        assert!(matches!(seq.next().await, PartEvent::Failed(_)));
        assert!(matches!(seq.next().await, PartEvent::Ended));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_pending_provider() {
        let cancel = CancellationToken::new();
        let pending: PartStream = Box::pin(
            stream::iter(vec![Ok(ContentPart::text("first"))]).chain(stream::pending()),
        );
        let mut seq = PartSequence::new(pending, cancel.clone());
        assert!(matches!(seq.next().await, PartEvent::Part(_)));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let ev = tokio::time::timeout(Duration::from_secs(2), seq.next())
            .await
            .expect("cancellation should wake the sequence");
        assert!(matches!(ev, PartEvent::Cancelled));
        assert!(matches!(seq.next().await, PartEvent::Cancelled));
    }
}
