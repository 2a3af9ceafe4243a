use crate::error::{ProxyError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Default capacity of the handle table.
pub const HANDLE_CAP: usize = 100_000;
/// Default lifetime of a signed handle.
pub const HANDLE_TTL: Duration = Duration::from_secs(600);

/// What a signed handle resolves to.
#[derive(Clone, Debug)]
pub struct HandleEntry {
    pub origin_url: String,
    pub referer: Option<String>,
    pub kind: String,
    pub expires_at: u64,
}

// Entry map plus an expiry-ordered index; both mutate under one lock so the
// index never disagrees with the map. Same-second expiries tie-break by
// issue order.
struct Inner {
    entries: HashMap<Uuid, HandleEntry>,
    by_expiry: BTreeMap<(u64, u64), Uuid>,
    seq: u64,
}

/// Bounded table of signed, time-limited handles.
///
/// A handle hides the origin URL from clients: the external form is
/// `handleId|expiry|hex(hmac_sha256(secret, handleId‖expiry‖kind))` and only
/// tokens the table itself minted can be redeemed. At capacity the handle
/// with the soonest expiry is evicted; redemption does not extend a handle's
/// life. A periodic [`sweep`](HandleTable::sweep) drops entries whose expiry
/// passed without redemption.
pub struct HandleTable {
    secret: Vec<u8>,
    ttl: Duration,
    cap: usize,
    inner: Mutex<Inner>,
}

impl HandleTable {
    pub fn new(secret: &str, cap: usize, ttl: Duration) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl,
            cap: cap.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                by_expiry: BTreeMap::new(),
                seq: 0,
            }),
        }
    }

    /// Mint a handle for `origin_url` and return its external token form.
    pub fn issue(&self, origin_url: &str, referer: Option<&str>, kind: &str) -> String {
        let id = Uuid::new_v4();
        let expires_at = epoch_secs() + self.ttl.as_secs();
        let mac = self.mac_hex(&id, expires_at, kind);

        let entry = HandleEntry {
            origin_url: origin_url.to_string(),
            referer: referer.map(str::to_string),
            kind: kind.to_string(),
            expires_at,
        };

        let mut inner = self.inner.lock().expect("handle table lock poisoned");
        while inner.entries.len() >= self.cap {
            match inner.by_expiry.pop_first() {
                Some((_, oldest_id)) => {
                    inner.entries.remove(&oldest_id);
                }
                None => break,
            }
        }
        let seq = inner.seq;
        inner.seq += 1;
        inner.by_expiry.insert((expires_at, seq), id);
        inner.entries.insert(id, entry);

        format!("{id}|{expires_at}|{mac}")
    }

    /// Redeem a token, returning the stored entry.
    ///
    /// Fails with [`ProxyError::HandleNotFound`] when the handle is unknown,
    /// expired, or carries a bad signature. MAC comparison is constant-time
    /// via [`Mac::verify_slice`].
    pub fn redeem(&self, token: &str) -> Result<HandleEntry> {
        let mut parts = token.splitn(3, '|');
        let (Some(id), Some(expiry), Some(mac)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ProxyError::BadRequest("Malformed handle".to_string()));
        };
        let id = Uuid::parse_str(id)
            .map_err(|_| ProxyError::BadRequest("Malformed handle".to_string()))?;
        let expiry: u64 = expiry
            .parse()
            .map_err(|_| ProxyError::BadRequest("Malformed handle".to_string()))?;
        let mac = hex::decode(mac)
            .map_err(|_| ProxyError::BadRequest("Malformed handle".to_string()))?;

        let entry = {
            let inner = self.inner.lock().expect("handle table lock poisoned");
            inner.entries.get(&id).cloned()
        }
        .ok_or(ProxyError::HandleNotFound)?;

        let mut verifier = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ProxyError::Internal(format!("HMAC init failed: {e}")))?;
        verifier.update(signing_input(&id, expiry, &entry.kind).as_bytes());
        verifier
            .verify_slice(&mac)
            .map_err(|_| ProxyError::HandleNotFound)?;

        if epoch_secs() >= expiry {
            return Err(ProxyError::HandleNotFound);
        }
        Ok(entry)
    }

    /// Drop entries whose expiry has passed; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = epoch_secs();
        let mut inner = self.inner.lock().expect("handle table lock poisoned");
        let mut removed = 0;
        while let Some(((expires_at, seq), id)) = inner.by_expiry.pop_first() {
            if expires_at > now {
                // Not expired; the index is expiry-ordered, so nothing past
                // this point is either.
                inner.by_expiry.insert((expires_at, seq), id);
                break;
            }
            inner.entries.remove(&id);
            removed += 1;
        }
        removed
    }

    /// Number of live (not yet swept) handles.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("handle table lock poisoned")
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn mac_hex(&self, id: &Uuid, expiry: u64, kind: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(signing_input(id, expiry, kind).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

fn signing_input(id: &Uuid, expiry: u64, kind: &str) -> String {
    format!("{id}{expiry}{kind}")
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(ttl: Duration) -> HandleTable {
        HandleTable::new("test-secret", 16, ttl)
    }

    #[test]
    fn issue_then_redeem_round_trip() {
        let t = table(HANDLE_TTL);
        let token = t.issue(
            "https://cdn.example/a/seg-001.ts",
            Some("https://site.example/"),
            "seg",
        );

        let entry = t.redeem(&token).unwrap();
        assert_eq!(entry.origin_url, "https://cdn.example/a/seg-001.ts");
        assert_eq!(entry.referer.as_deref(), Some("https://site.example/"));
        assert_eq!(entry.kind, "seg");
    }

    #[test]
    fn expired_handle_is_not_found() {
        let t = table(Duration::from_secs(0));
        let token = t.issue("https://cdn.example/a.ts", None, "seg");
        assert!(matches!(
            t.redeem(&token),
            Err(ProxyError::HandleNotFound)
        ));
    }

    #[test]
    fn tampered_mac_is_rejected() {
        let t = table(HANDLE_TTL);
        let token = t.issue("https://cdn.example/a.ts", None, "seg");
        let mut tampered = token[..token.len() - 2].to_string();
        tampered.push_str("00");
        assert!(matches!(
            t.redeem(&tampered),
            Err(ProxyError::HandleNotFound)
        ));
    }

    #[test]
    fn tampered_expiry_is_rejected() {
        let t = table(Duration::from_secs(0));
        let token = t.issue("https://cdn.example/a.ts", None, "seg");
        // Push the expiry into the future without re-signing
        let mut parts: Vec<String> = token.split('|').map(str::to_string).collect();
        parts[1] = (epoch_secs() + 9999).to_string();
        assert!(t.redeem(&parts.join("|")).is_err());
    }

    #[test]
    fn unknown_handle_is_not_found() {
        let t = table(HANDLE_TTL);
        let other = table(HANDLE_TTL);
        let token = other.issue("https://cdn.example/a.ts", None, "seg");
        assert!(matches!(
            t.redeem(&token),
            Err(ProxyError::HandleNotFound)
        ));
    }

    #[test]
    fn malformed_token_is_bad_request() {
        let t = table(HANDLE_TTL);
        assert!(matches!(
            t.redeem("not-a-handle"),
            Err(ProxyError::BadRequest(_))
        ));
        assert!(matches!(
            t.redeem("a|b|c"),
            Err(ProxyError::BadRequest(_))
        ));
    }

    #[test]
    fn capacity_evicts_soonest_expiry() {
        let t = HandleTable::new("s", 2, HANDLE_TTL);
        let first = t.issue("https://cdn.example/1.ts", None, "seg");
        let second = t.issue("https://cdn.example/2.ts", None, "seg");

        // Redeeming a handle must not extend its life: `first` still has the
        // soonest expiry and is the one evicted at capacity.
        assert!(t.redeem(&first).is_ok());
        t.issue("https://cdn.example/3.ts", None, "seg");

        assert_eq!(t.len(), 2);
        assert!(t.redeem(&first).is_err());
        assert!(t.redeem(&second).is_ok());
    }

    #[test]
    fn sweep_drops_expired_only() {
        let t = table(Duration::from_secs(0));
        t.issue("https://cdn.example/1.ts", None, "seg");
        t.issue("https://cdn.example/2.ts", None, "seg");
        assert_eq!(t.len(), 2);
        assert_eq!(t.sweep(), 2);
        assert!(t.is_empty());
    }
}
