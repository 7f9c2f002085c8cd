//! Server-side modules for the grocr realtime server.

pub mod accounts;
pub mod realtime;
pub mod sessions;
pub mod storage;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Json, Router,
};
use grocr_core::{presence_root, AccountStore, MemoryStore};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

pub use sessions::SessionStore;
pub use storage::{ServerStorage, ServerStorageError};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: MemoryStore,
    pub accounts: Arc<RwLock<AccountStore>>,
    pub sessions: Arc<SessionStore>,
    /// `None` keeps everything in memory.
    pub storage: Option<ServerStorage>,
}

impl AppState {
    /// State with nothing persisted.
    pub fn in_memory() -> Self {
        Self {
            store: MemoryStore::new(),
            accounts: Arc::new(RwLock::new(AccountStore::new())),
            sessions: Arc::new(SessionStore::default()),
            storage: None,
        }
    }

    /// Loads the tree and accounts saved in `storage`.
    ///
    /// Presence records belong to connections of a previous run, so they are
    /// dropped from the loaded tree.
    pub fn load(storage: ServerStorage) -> Result<Self, ServerStorageError> {
        let mut tree = storage.load_tree()?.unwrap_or_default();
        if tree.get(&presence_root()).is_some() {
            tracing::info!("Dropping stale presence records");
            tree.remove(&presence_root());
        }
        let accounts = storage.load_accounts()?.unwrap_or_default();
        tracing::info!("Loaded {} account(s)", accounts.len());

        Ok(Self {
            store: MemoryStore::from_tree(tree),
            accounts: Arc::new(RwLock::new(accounts)),
            sessions: Arc::new(SessionStore::default()),
            storage: Some(storage),
        })
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Builds the server's router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/accounts", post(accounts::create_account))
        .route("/sessions", post(accounts::create_session))
        .route("/realtime", get(realtime::realtime))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Saves the tree after every change to `store`. Bursts of changes that
/// arrive while a save is running are coalesced into one save.
pub fn persist_changes(store: MemoryStore, storage: ServerStorage) -> JoinHandle<()> {
    let mut changes = store.changes();
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
            while changes.try_recv().is_ok() {}

            let tree = store.durable_tree();
            let result = tokio::task::spawn_blocking({
                let storage = storage.clone();
                move || storage.save_tree(&tree)
            })
            .await;

            match result {
                Ok(Ok(())) => tracing::debug!("Saved tree"),
                Ok(Err(e)) => tracing::warn!("Failed to save tree: {}", e),
                Err(e) => tracing::warn!("Tree save task failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use grocr_core::{
        HttpAuth, IdentityProvider, ListSynchronizer, PresenceTracker, RemoteStore, StoreError,
        StorePath, WsStore,
    };
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn spawn_server(state: AppState) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        addr
    }

    /// Polls `check` until it holds or two seconds pass.
    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(AppState::in_memory());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_create_account_and_session() {
        let state = AppState::in_memory();
        let credentials = json!({"email": "a@x.com", "password": "secret1"});

        let (status, created) =
            post_json(router(state.clone()), "/accounts", credentials.clone()).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["email"], "a@x.com");

        let (status, session) =
            post_json(router(state.clone()), "/sessions", credentials.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["uid"], created["uid"]);

        // Each response carries its own token for the signed-in user.
        let token = session["token"].as_str().unwrap();
        assert_ne!(Some(token), created["token"].as_str());
        assert_eq!(
            state.sessions.user(token).map(|user| user.uid),
            created["uid"].as_str().map(String::from)
        );

        let (status, body) = post_json(router(state), "/accounts", credentials).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "account_exists");
    }

    #[tokio::test]
    async fn test_account_errors() {
        let state = AppState::in_memory();

        let (status, _) = post_json(
            router(state.clone()),
            "/accounts",
            json!({"email": "a@x.com", "password": "123"}),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = post_json(
            router(state.clone()),
            "/accounts",
            json!({"email": "", "password": "secret1"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post_json(
            router(state),
            "/sessions",
            json!({"email": "nobody@x.com", "password": "secret1"}),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_credentials");
    }

    #[tokio::test]
    async fn test_accounts_persist() {
        let temp = TempDir::new().unwrap();
        let state = AppState::load(ServerStorage::new(temp.path())).unwrap();

        let (status, _) = post_json(
            router(state),
            "/accounts",
            json!({"email": "a@x.com", "password": "secret1"}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let reloaded = AppState::load(ServerStorage::new(temp.path())).unwrap();
        assert!(reloaded
            .accounts
            .read()
            .await
            .verify("a@x.com", "secret1")
            .is_ok());
    }

    #[tokio::test]
    async fn test_presence_not_restored_after_restart() {
        let temp = TempDir::new().unwrap();
        let storage = ServerStorage::new(temp.path());
        let state = AppState::load(storage.clone()).unwrap();

        let connection = std::sync::Arc::new(state.store.connect());
        let alice = grocr_core::User::new("u1", "a@x.com");
        PresenceTracker::new(connection.clone())
            .on_identity_resolved(&alice)
            .await
            .unwrap();
        connection
            .set(
                &StorePath::parse("grocery-items/milk").unwrap(),
                json!({"name": "Milk", "addedByUser": "a@x.com", "completed": false}),
            )
            .await
            .unwrap();

        // What the change feed saves leaves live presence out.
        let durable = state.store.durable_tree();
        assert!(durable.get(&presence_root()).is_none());

        // A tree saved with presence in it, as by an abrupt stop, is cleaned
        // on load.
        storage.save_tree(&state.store.tree()).unwrap();
        let reloaded = AppState::load(storage).unwrap();
        assert_eq!(reloaded.store.value(&presence_root()), Value::Null);
        assert_eq!(
            reloaded
                .store
                .value(&StorePath::parse("grocery-items/milk/name").unwrap()),
            json!("Milk")
        );

        let observer = PresenceTracker::new(std::sync::Arc::new(reloaded.store.connect()));
        let _handle = observer.subscribe_count(|_| {}).await.unwrap();
        assert!(eventually(|| observer.count() == 0).await);
    }

    #[tokio::test]
    async fn test_persist_changes_skips_presence() {
        let temp = TempDir::new().unwrap();
        let storage = ServerStorage::new(temp.path());
        let state = AppState::load(storage.clone()).unwrap();
        let _task = persist_changes(state.store.clone(), storage.clone());

        let connection = std::sync::Arc::new(state.store.connect());
        PresenceTracker::new(connection.clone())
            .on_identity_resolved(&grocr_core::User::new("u1", "a@x.com"))
            .await
            .unwrap();
        let milk = StorePath::parse("grocery-items/milk").unwrap();
        connection
            .set(&milk, json!({"name": "Milk", "addedByUser": "a@x.com", "completed": false}))
            .await
            .unwrap();

        assert!(
            eventually(|| matches!(
                storage.load_tree(),
                Ok(Some(tree)) if tree.get(&milk).is_some()
            ))
            .await
        );
        let saved = storage.load_tree().unwrap().unwrap();
        assert!(saved.get(&presence_root()).is_none());
    }

    #[tokio::test]
    async fn test_persist_changes_saves_tree() {
        let temp = TempDir::new().unwrap();
        let storage = ServerStorage::new(temp.path());
        let state = AppState::load(storage.clone()).unwrap();
        let _task = persist_changes(state.store.clone(), storage.clone());

        let connection = state.store.connect();
        let path = StorePath::parse("grocery-items/milk").unwrap();
        connection
            .set(&path, json!({"name": "Milk", "addedByUser": "a@x.com", "completed": false}))
            .await
            .unwrap();

        assert!(
            eventually(|| matches!(
                storage.load_tree(),
                Ok(Some(tree)) if tree.get(&path).is_some()
            ))
            .await
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_realtime_end_to_end() {
        let state = AppState::in_memory();
        let store = state.store.clone();
        let addr = spawn_server(state).await;
        let server_url = format!("http://{}", addr);

        // Two clients, each signed in over HTTP with its own socket.
        let auth_a = HttpAuth::new(server_url.clone());
        let alice = auth_a.create_account("a@x.com", "secret1").await.unwrap();
        let auth_b = HttpAuth::new(server_url.clone());
        let bob = auth_b.create_account("b@x.com", "secret2").await.unwrap();

        let ws_a = std::sync::Arc::new(
            WsStore::connect_with_token(&server_url, auth_a.token().as_deref())
                .await
                .unwrap(),
        );
        let ws_b = std::sync::Arc::new(
            WsStore::connect_with_token(&server_url, auth_b.token().as_deref())
                .await
                .unwrap(),
        );

        let list_a = ListSynchronizer::new(ws_a.clone());
        let list_b = ListSynchronizer::new(ws_b.clone());
        let _list_a_handle = list_a.subscribe(|_| {}).await.unwrap();
        let _list_b_handle = list_b.subscribe(|_| {}).await.unwrap();

        list_a.add_item("Milk", &alice).await.unwrap();
        assert!(eventually(|| list_b.items().len() == 1).await);
        let milk = list_b.items()[0].clone();
        assert_eq!(milk.key, "milk");
        assert_eq!(milk.added_by_user, "a@x.com");

        list_b.toggle_completed(&milk).await.unwrap();
        assert!(eventually(|| list_a.items().first().is_some_and(|i| i.completed)).await);

        // Presence: both online, then A's socket closes.
        let presence_a = PresenceTracker::new(ws_a.clone());
        let presence_b = PresenceTracker::new(ws_b.clone());
        let _count_handle = presence_b.subscribe_count(|_| {}).await.unwrap();
        presence_a.on_identity_resolved(&alice).await.unwrap();
        presence_b.on_identity_resolved(&bob).await.unwrap();
        assert!(eventually(|| presence_b.count() == 2).await);

        ws_a.close();
        assert!(eventually(|| presence_b.count() == 1).await);
        assert!(store
            .value(&StorePath::parse("online").unwrap())
            .get(&alice.uid)
            .is_none());
        assert_eq!(
            store.value(&StorePath::parse(&format!("online/{}", bob.uid)).unwrap()),
            json!(bob.email)
        );
        assert_eq!(auth_a.current_user(), Some(alice));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_realtime_presence_writes_need_own_session() {
        let state = AppState::in_memory();
        let store = state.store.clone();
        let addr = spawn_server(state).await;
        let server_url = format!("http://{}", addr);

        let auth = HttpAuth::new(server_url.clone());
        let alice = auth.create_account("a@x.com", "secret1").await.unwrap();
        let ws = WsStore::connect_with_token(&server_url, auth.token().as_deref())
            .await
            .unwrap();

        let own = StorePath::parse(&format!("online/{}", alice.uid)).unwrap();
        ws.on_disconnect_remove(&own).await.unwrap();
        ws.set(&own, json!(alice.email)).await.unwrap();

        let other = StorePath::parse("online/someone-else").unwrap();
        assert!(matches!(
            ws.set(&other, json!("b@x.com")).await,
            Err(StoreError::PermissionDenied(_))
        ));
        assert!(matches!(
            ws.remove(&presence_root()).await,
            Err(StoreError::PermissionDenied(_))
        ));

        // Without a session the socket still works on items, not presence.
        let anonymous = WsStore::connect(&server_url).await.unwrap();
        assert!(matches!(
            anonymous.remove(&own).await,
            Err(StoreError::PermissionDenied(_))
        ));
        anonymous
            .set(
                &StorePath::parse("grocery-items/milk").unwrap(),
                json!({"name": "Milk", "addedByUser": "a@x.com", "completed": false}),
            )
            .await
            .unwrap();

        assert_eq!(store.value(&own), json!(alice.email));
        assert!(store.value(&other).is_null());

        assert!(WsStore::connect_with_token(&server_url, Some("not-a-token"))
            .await
            .is_err());
    }
}
