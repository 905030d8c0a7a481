use crate::token::Token;

/// Observer of token lifecycle events.
///
/// Both callbacks run synchronously on the thread that hit the failure or
/// performed the refresh. Several failing calls may each invoke
/// `on_token_invalid` independently.
pub trait TokenListener: Send + Sync {
    /// The current token was rejected. Return a replacement (for instance a
    /// token cached elsewhere) to adopt it instead of refreshing.
    fn on_token_invalid(&self, token: Option<&Token>) -> Option<Token>;

    /// A refresh grant installed `token` as the current token
    fn on_token_refreshed(&self, token: &Token);
}

/// Listener that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl TokenListener for NoopListener {
    fn on_token_invalid(&self, _token: Option<&Token>) -> Option<Token> {
        None
    }

    fn on_token_refreshed(&self, _token: &Token) {}
}
