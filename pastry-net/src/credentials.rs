/// A pluggable validity check for inbound message credentials. Not a
/// handshake: every frame carries its own opaque credential bytes and is
/// judged independently. A message that fails validation is dropped
/// silently and its sender is never inserted into any table.
pub trait CredentialsProvider: Send + Sync {
    fn is_valid(&self, credentials: &[u8]) -> bool;
}

/// Accepts everything. The default when no provider is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl CredentialsProvider for AllowAll {
    fn is_valid(&self, _credentials: &[u8]) -> bool {
        true
    }
}

/// Accepts only an exact byte-string match, e.g. a shared cluster secret.
#[derive(Debug, Clone)]
pub struct SharedSecret(pub Vec<u8>);

impl CredentialsProvider for SharedSecret {
    fn is_valid(&self, credentials: &[u8]) -> bool {
        credentials == self.0.as_slice()
    }
}
