use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::store::BookmarkStore;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Read side of the session. The engine only ever observes who is signed in;
/// authentication itself lives with the embedding application.
#[derive(Clone)]
pub struct SessionTracker {
    rx: watch::Receiver<Option<UserProfile>>,
}

impl SessionTracker {
    pub fn current_user(&self) -> Option<UserProfile> {
        self.rx.borrow().clone()
    }

    pub(crate) fn changes(&self) -> watch::Receiver<Option<UserProfile>> {
        self.rx.clone()
    }
}

/// Write side, held by whatever owns authentication.
pub struct SessionHandle {
    tx: watch::Sender<Option<UserProfile>>,
}

impl SessionHandle {
    pub fn new(initial: Option<UserProfile>) -> (Self, SessionTracker) {
        let (tx, rx) = watch::channel(initial);
        (SessionHandle { tx }, SessionTracker { rx })
    }

    pub fn sign_in(&self, user: UserProfile) {
        let _ = self.tx.send(Some(user));
    }

    pub fn sign_out(&self) {
        let _ = self.tx.send(None);
    }
}

/// Clear the store the moment the session ends. Runs until the session
/// handle is dropped.
pub async fn run_session_watch(
    mut changes: watch::Receiver<Option<UserProfile>>,
    store: BookmarkStore,
) {
    while changes.changed().await.is_ok() {
        if changes.borrow_and_update().is_none() {
            store.clear();
            tracing::info!("session ended, local bookmarks cleared");
        }
    }
}

// ── profile derivation ──────────────────────────────────────────────────────

/// Build a profile from the raw auth-provider user object.
///
/// Display name falls through the metadata candidates the provider may set,
/// then the first identity's data, then the email local part. Avatar falls
/// through the usual metadata keys the same way.
pub fn profile_from_auth_user(user: &Value) -> Option<UserProfile> {
    let id = user.get("id")?.as_str()?.to_string();
    let meta = user.get("user_metadata").cloned().unwrap_or(Value::Null);
    let identity = user
        .pointer("/identities/0/identity_data")
        .cloned()
        .unwrap_or(Value::Null);

    let display_name = [
        meta.get("full_name"),
        meta.get("name"),
        meta.get("user_name"),
        meta.get("preferred_username"),
        meta.get("nickname"),
        identity.get("full_name"),
        identity.get("name"),
    ]
    .into_iter()
    .flatten()
    .filter_map(Value::as_str)
    .map(str::trim)
    .find(|s| !s.is_empty())
    .map(str::to_string)
    .or_else(|| {
        user.get("email")
            .and_then(Value::as_str)
            .filter(|e| e.contains('@'))
            .and_then(|e| e.split('@').next())
            .map(str::to_string)
    })
    .unwrap_or_default();

    let avatar_url = [
        meta.get("avatar_url"),
        meta.get("picture"),
        meta.get("avatar"),
        identity.get("avatar_url"),
        identity.get("picture"),
    ]
    .into_iter()
    .flatten()
    .filter_map(Value::as_str)
    .map(str::trim)
    .find(|s| !s.is_empty())
    .map(str::to_string);

    Some(UserProfile {
        id,
        display_name,
        avatar_url,
    })
}
