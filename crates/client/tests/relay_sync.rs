use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use murmur_client::cache::ConversationCache;
use murmur_client::config::ClientConfig;
use murmur_client::connection::SessionEvent;
use murmur_client::identity::IdentityProvider;
use murmur_client::runtime::{self, SyncHandle};
use murmur_common::types::{Identity, Role};
use murmur_relay::config::RelayConfig;
use murmur_relay::RelayState;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

async fn start_relay() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("test listener should bind");
    let addr = listener.local_addr().expect("listener should expose local address");
    let state = RelayState::new(&RelayConfig::default());
    tokio::spawn(async move {
        murmur_relay::serve(listener, state, std::future::pending())
            .await
            .expect("relay should run");
    });
    addr
}

fn client_config(addr: SocketAddr) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.server_url = format!("ws://{addr}/ws");
    config.reconnect.delay_ms = 50;
    config
}

async fn start_client(addr: SocketAddr, identity: Identity) -> (IdentityProvider, SyncHandle) {
    start_client_with(client_config(addr), identity).await
}

async fn start_client_with(
    config: ClientConfig,
    identity: Identity,
) -> (IdentityProvider, SyncHandle) {
    let provider = IdentityProvider::new();
    let handle = runtime::start(&config, &provider);
    let mut lifecycle = handle.subscribe_lifecycle();
    provider.login(identity);

    timeout(WAIT, async {
        loop {
            match lifecycle.recv().await {
                Ok(SessionEvent::Ready { .. }) => return,
                Ok(_) => continue,
                Err(error) => panic!("lifecycle closed before ready: {error}"),
            }
        }
    })
    .await
    .expect("client should become ready");

    (provider, handle)
}

async fn wait_for_cache<F>(handle: &SyncHandle, mut check: F)
where
    F: FnMut(&ConversationCache) -> bool,
{
    let cache = handle.cache();
    timeout(WAIT, async {
        loop {
            if check(&*cache.read().await) {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("cache never reached the expected state");
}

async fn wait_for_online(handle: &SyncHandle, identity_id: &str) {
    let mut presence = handle.presence().subscribe();
    timeout(WAIT, async {
        while !presence.borrow_and_update().contains(identity_id) {
            presence.changed().await.expect("presence tracker should stay alive");
        }
    })
    .await
    .expect("identity never came online");
}

async fn wait_for_offline(handle: &SyncHandle, identity_id: &str) {
    let mut presence = handle.presence().subscribe();
    timeout(WAIT, async {
        while presence.borrow_and_update().contains(identity_id) {
            presence.changed().await.expect("presence tracker should stay alive");
        }
    })
    .await
    .expect("identity never went offline");
}

fn bodies(cache: &ConversationCache, key: &str) -> Vec<String> {
    cache.messages(key).iter().filter_map(|message| message.body.clone()).collect()
}

/// TCP hop in front of the relay whose live links can be cut, so a client
/// loses its connection while the relay keeps running.
struct Hop {
    addr: SocketAddr,
    open: Arc<AtomicBool>,
    links: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Hop {
    async fn start(upstream: SocketAddr) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("hop listener should bind");
        let addr = listener.local_addr().expect("hop should expose local address");
        let open = Arc::new(AtomicBool::new(true));
        let links = Arc::new(Mutex::new(Vec::new()));

        let (accepting, tracked) = (open.clone(), links.clone());
        tokio::spawn(async move {
            while let Ok((mut inbound, _)) = listener.accept().await {
                if !accepting.load(Ordering::SeqCst) {
                    continue;
                }
                let link = tokio::spawn(async move {
                    if let Ok(mut outbound) = TcpStream::connect(upstream).await {
                        let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                    }
                });
                tracked.lock().unwrap().push(link);
            }
        });

        Self { addr, open, links }
    }

    /// Drop every live link and refuse new ones.
    fn sever(&self) {
        self.open.store(false, Ordering::SeqCst);
        for link in self.links.lock().unwrap().drain(..) {
            link.abort();
        }
    }

    fn resume(&self) {
        self.open.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn message_and_deletion_flow_between_two_clients() {
    let addr = start_relay().await;
    let (_buyer_login, buyer) = start_client(addr, Identity::new("u1", Role::Primary)).await;
    let (_seller_login, seller) = start_client(addr, Identity::new("u2", Role::Counterparty)).await;

    wait_for_online(&buyer, "u2").await;
    wait_for_online(&seller, "u1").await;

    seller.send_message("u1", Some("hi".into()), None).await.expect("send should be accepted");

    wait_for_cache(&buyer, |cache| cache.messages("u2").len() == 1).await;
    {
        let cache = buyer.cache();
        let cache = cache.read().await;
        assert_eq!(cache.unread_count("u2"), 1);
        let meta = cache
            .conversation("u2")
            .and_then(|conversation| conversation.last_message_meta())
            .expect("conversation meta should be set");
        assert_eq!(meta.preview, "hi");
        assert_eq!(meta.sender_id, "u2");
    }

    // The sender's own copy lands in its cache without touching unread.
    wait_for_cache(&seller, |cache| cache.messages("u1").len() == 1).await;
    let message_id = {
        let cache = seller.cache();
        let cache = cache.read().await;
        assert_eq!(cache.unread_count("u1"), 0);
        cache.messages("u1")[0].id.clone()
    };

    buyer.open_conversation(Some("u2".into())).await;
    assert_eq!(buyer.cache().read().await.unread_count("u2"), 0);

    seller.delete_messages(vec![message_id.clone()]).await.expect("delete should be accepted");

    wait_for_cache(&buyer, |cache| {
        cache.messages("u2").iter().any(|message| message.id == message_id && message.deleted)
    })
    .await;
    {
        let cache = buyer.cache();
        let cache = cache.read().await;
        assert_eq!(cache.messages("u2").len(), 1);
        assert!(cache.messages("u2")[0].body.is_none());
    }

    buyer.wait().await;
    seller.wait().await;
}

#[tokio::test]
async fn logout_takes_identity_offline_for_peers() {
    let addr = start_relay().await;
    let (_watcher_login, watcher) = start_client(addr, Identity::new("u1", Role::Primary)).await;
    let (leaver_login, leaver) = start_client(addr, Identity::new("u2", Role::Counterparty)).await;

    wait_for_online(&watcher, "u2").await;

    leaver_login.logout();
    wait_for_offline(&watcher, "u2").await;

    let mut own_view = leaver.presence().subscribe();
    timeout(WAIT, async {
        while !own_view.borrow_and_update().is_empty() {
            own_view.changed().await.expect("presence tracker should stay alive");
        }
    })
    .await
    .expect("logged-out client should forget presence");
    assert!(leaver.cache().read().await.is_empty());

    watcher.wait().await;
    leaver.wait().await;
}

#[tokio::test]
async fn messages_missed_while_disconnected_are_recovered_on_reconnect() {
    let addr = start_relay().await;
    let hop = Hop::start(addr).await;
    let mut config = client_config(hop.addr);
    config.reconnect.max_attempts = 200;
    let (_roamer_login, roamer) =
        start_client_with(config, Identity::new("u1", Role::Primary)).await;
    let (_peer_login, peer) = start_client(addr, Identity::new("u2", Role::Counterparty)).await;
    wait_for_online(&peer, "u1").await;

    peer.send_message("u1", Some("hi".into()), None).await.expect("send should be accepted");
    wait_for_cache(&roamer, |cache| cache.messages("u2").len() == 1).await;

    hop.sever();
    wait_for_offline(&peer, "u1").await;

    peer.send_message("u1", Some("missed".into()), None).await.expect("send should be accepted");
    wait_for_cache(&peer, |cache| cache.messages("u1").len() == 2).await;
    hop.resume();

    wait_for_cache(&roamer, |cache| bodies(cache, "u2") == ["hi", "missed"]).await;
    {
        let cache = roamer.cache();
        let cache = cache.read().await;
        assert_eq!(cache.unread_count("u2"), 2);
        let meta = cache
            .conversation("u2")
            .and_then(|conversation| conversation.last_message_meta())
            .expect("conversation meta should be set");
        assert_eq!(meta.preview, "missed");
    }
    wait_for_online(&peer, "u1").await;

    roamer.wait().await;
    peer.wait().await;
}
