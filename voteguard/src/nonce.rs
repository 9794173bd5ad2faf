use crate::*;
use std::collections::HashMap;
use std::sync::Mutex;

/// Default challenge lifetime.
pub const NONCE_TTL_SECS: i64 = 120;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum NonceStatus {
    Unused,
    Used,
}

#[derive(Copy, Clone, Debug)]
struct NonceRecord {
    status: NonceStatus,
    expires_at: i64,
}

/// Ephemeral single-use token store.
///
/// `consume` is the only replay defense in the challenge protocol, so it must
/// be one indivisible check-and-set: two concurrent consumers of the same
/// token get exactly one `true` between them. Here the whole transition runs
/// under a single lock; a durable backing store would use its own atomic
/// compare-and-swap instead.
pub struct SingleUseTokenStore {
    ttl_secs: i64,
    inner: Mutex<HashMap<NonceToken, NonceRecord>>,
}

impl SingleUseTokenStore {
    pub fn new(ttl_secs: i64) -> Self {
        SingleUseTokenStore {
            ttl_secs,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Generate a random token, record it unused, and return it with its ttl.
    pub fn issue(&self) -> Result<(NonceToken, i64), Error> {
        let token = NonceToken::random();
        let record = NonceRecord {
            status: NonceStatus::Unused,
            expires_at: util::now() + self.ttl_secs,
        };

        let mut inner = self.lock()?;
        inner.insert(token, record);
        Ok((token, self.ttl_secs))
    }

    /// Atomically transition a token unused -> used.
    ///
    /// Returns true only if the token existed, was unused, and had not
    /// expired. Every other case (missing, already used, expired-unused)
    /// returns false with no side effect, and the caller cannot tell which
    /// case it was.
    pub fn consume(&self, token: &NonceToken) -> Result<bool, Error> {
        self.consume_at(token, util::now())
    }

    pub fn consume_at(&self, token: &NonceToken, now: i64) -> Result<bool, Error> {
        let mut inner = self.lock()?;
        match inner.get_mut(token) {
            Some(record) if record.status == NonceStatus::Unused && now < record.expires_at => {
                record.status = NonceStatus::Used;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Drop expired records. Expiry itself needs no sweep (consume checks the
    /// deadline), this only reclaims memory. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize, Error> {
        let now = util::now();
        let mut inner = self.lock()?;
        let before = inner.len();
        inner.retain(|_, record| now < record.expires_at);
        Ok(before - inner.len())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<HashMap<NonceToken, NonceRecord>>, Error> {
        self.inner
            .lock()
            .map_err(|_| Error::StoreUnavailable("nonce store lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_consume_once() {
        let store = SingleUseTokenStore::new(NONCE_TTL_SECS);
        let (token, ttl) = store.issue().unwrap();
        assert_eq!(ttl, NONCE_TTL_SECS);

        assert!(store.consume(&token).unwrap());
        assert!(!store.consume(&token).unwrap());
    }

    #[test]
    fn test_unknown_token() {
        let store = SingleUseTokenStore::new(NONCE_TTL_SECS);
        assert!(!store.consume(&NonceToken::random()).unwrap());
    }

    #[test]
    fn test_expired_unused_never_consumes() {
        let store = SingleUseTokenStore::new(0);
        let (token, _) = store.issue().unwrap();
        assert!(!store.consume(&token).unwrap());
    }

    #[test]
    fn test_failed_consume_has_no_side_effect() {
        let store = SingleUseTokenStore::new(NONCE_TTL_SECS);
        let (token, _) = store.issue().unwrap();

        // A consume attempt past the deadline fails without burning the token
        let after_expiry = util::now() + NONCE_TTL_SECS + 1;
        assert!(!store.consume_at(&token, after_expiry).unwrap());
        assert!(store.consume(&token).unwrap());
    }

    #[test]
    fn test_concurrent_consume_single_winner() {
        let store = Arc::new(SingleUseTokenStore::new(NONCE_TTL_SECS));
        let (token, _) = store.issue().unwrap();

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let mut handles = Vec::new();
        for _ in 0..threads {
            let store = store.clone();
            let barrier = barrier.clone();
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                store.consume(&token).unwrap()
            }));
        }

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }

    #[test]
    fn test_purge_expired() {
        let store = SingleUseTokenStore::new(-1);
        store.issue().unwrap();
        store.issue().unwrap();
        assert_eq!(store.purge_expired().unwrap(), 2);
    }
}
