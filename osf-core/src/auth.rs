/// Supplies the bearer credential attached to every API call.
///
/// Token storage lives outside this crate; implementors only hand out the
/// current value.
pub trait TokenSource: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenSource for StaticToken {
    fn access_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}
