//! Contract tests for the simulated coordination service: authentication
//! and ACL enforcement, session-timeout negotiation, recursive creation,
//! and sequential naming.

use std::time::Duration;

use covey_core::Acl;
use covey_core::Connection;
use covey_core::Connector;
use covey_core::CoordinationError;
use covey_core::CreateFlags;
use covey_core::Credentials;
use covey_testing::SimulatedCluster;

async fn connect(cluster: &SimulatedCluster) -> Connection {
    cluster.connect(Duration::from_secs(10)).await.expect("connect")
}

#[tokio::test]
async fn session_timeout_is_clamped_into_advertised_bounds() {
    covey_testing::init_tracing();
    let cluster = SimulatedCluster::new();
    cluster.set_min_session_timeout(Duration::from_secs(5));
    cluster.set_max_session_timeout(Duration::from_secs(20));

    let low = cluster.connect(Duration::from_secs(1)).await.expect("connect");
    assert_eq!(low.client.session_timeout(), Duration::from_secs(5));

    let high = cluster.connect(Duration::from_secs(60)).await.expect("connect");
    assert_eq!(high.client.session_timeout(), Duration::from_secs(20));

    let fits = cluster.connect(Duration::from_secs(10)).await.expect("connect");
    assert_eq!(fits.client.session_timeout(), Duration::from_secs(10));
}

#[tokio::test]
async fn creator_acl_matches_by_authenticated_identity() {
    covey_testing::init_tracing();
    let cluster = SimulatedCluster::new();

    let owner = connect(&cluster).await;
    owner
        .client
        .authenticate(&Credentials::digest("alice:secret"))
        .await
        .expect("authenticate");
    owner
        .client
        .create("/locked", b"payload", Acl::EVERYONE_READ_CREATOR_ALL, CreateFlags::default(), true)
        .await
        .expect("create /locked");

    // Unauthenticated sessions can read but neither create under nor delete.
    let stranger = connect(&cluster).await;
    assert_eq!(stranger.client.get("/locked").await.expect("get"), b"payload".to_vec());
    assert_eq!(
        stranger
            .client
            .create("/locked/x", b"", Acl::OPEN, CreateFlags::default(), false)
            .await,
        Err(CoordinationError::NotAuthorized { path: "/locked/x".into() })
    );
    assert_eq!(
        stranger.client.delete("/locked").await,
        Err(CoordinationError::NotAuthorized { path: "/locked".into() })
    );

    // A different session with the creator's credentials is the creator.
    let peer = connect(&cluster).await;
    peer.client
        .authenticate(&Credentials::digest("alice:secret"))
        .await
        .expect("authenticate");
    peer.client
        .create("/locked/x", b"", Acl::OPEN, CreateFlags::default(), false)
        .await
        .expect("peer create under /locked");
    peer.client.delete("/locked/x").await.expect("peer delete");
    peer.client.delete("/locked").await.expect("peer delete /locked");
}

#[tokio::test]
async fn readable_entries_are_not_writable_by_strangers() {
    covey_testing::init_tracing();
    let cluster = SimulatedCluster::new();

    let owner = connect(&cluster).await;
    owner
        .client
        .authenticate(&Credentials::digest("alice:secret"))
        .await
        .expect("authenticate");
    owner
        .client
        .create("/note", b"v1", Acl::EVERYONE_READ_CREATOR_ALL, CreateFlags::default(), true)
        .await
        .expect("create /note");
    owner.client.set("/note", b"v2", -1).await.expect("owner set");

    let stranger = connect(&cluster).await;
    assert_eq!(stranger.client.get("/note").await.expect("get"), b"v2".to_vec());
    assert_eq!(
        stranger.client.set("/note", b"v3", -1).await,
        Err(CoordinationError::NotAuthorized { path: "/note".into() })
    );

    // Same principal on a new session writes fine.
    let peer = connect(&cluster).await;
    peer.client
        .authenticate(&Credentials::digest("alice:secret"))
        .await
        .expect("authenticate");
    peer.client.set("/note", b"v3", -1).await.expect("peer set");
    assert_eq!(owner.client.get("/note").await.expect("get"), b"v3".to_vec());
}

#[tokio::test]
async fn shared_create_acl_still_reserves_deletion_to_the_creator() {
    covey_testing::init_tracing();
    let cluster = SimulatedCluster::new();

    let owner = connect(&cluster).await;
    owner
        .client
        .authenticate(&Credentials::digest("alice:secret"))
        .await
        .expect("authenticate");
    owner
        .client
        .create(
            "/shared",
            b"",
            Acl::EVERYONE_CREATE_AND_READ_CREATOR_ALL,
            CreateFlags::default(),
            true,
        )
        .await
        .expect("create /shared");

    let guest = connect(&cluster).await;
    guest
        .client
        .create("/shared/guest", b"", Acl::OPEN, CreateFlags::default(), false)
        .await
        .expect("guest create");
    assert_eq!(
        guest.client.delete("/shared").await,
        Err(CoordinationError::NotEmpty { path: "/shared".into() })
    );
    guest.client.delete("/shared/guest").await.expect("guest delete own entry");
    assert_eq!(
        guest.client.delete("/shared").await,
        Err(CoordinationError::NotAuthorized { path: "/shared".into() })
    );
}

#[tokio::test]
async fn recursive_create_builds_missing_ancestors() {
    covey_testing::init_tracing();
    let cluster = SimulatedCluster::new();
    let conn = connect(&cluster).await;

    assert_eq!(
        conn.client
            .create("/a/b/c", b"", Acl::OPEN, CreateFlags::default(), false)
            .await,
        Err(CoordinationError::NoNode { path: "/a/b".into() })
    );

    conn.client
        .create("/a/b/c", b"leaf", Acl::OPEN, CreateFlags::default(), true)
        .await
        .expect("recursive create");
    assert!(conn.client.exists("/a").await.expect("exists"));
    assert!(conn.client.exists("/a/b").await.expect("exists"));
    assert_eq!(conn.client.get("/a/b/c").await.expect("get"), b"leaf".to_vec());

    // Ancestors may exist; the leaf itself may not.
    assert_eq!(
        conn.client
            .create("/a/b/c", b"", Acl::OPEN, CreateFlags::default(), true)
            .await,
        Err(CoordinationError::NodeExists { path: "/a/b/c".into() })
    );
}

#[tokio::test]
async fn sequential_names_are_zero_padded_and_never_reused() {
    covey_testing::init_tracing();
    let cluster = SimulatedCluster::new();
    let conn = connect(&cluster).await;

    let flags = CreateFlags { ephemeral: false, sequential: true };

    // A trailing slash means an empty name prefix.
    let first = conn
        .client
        .create("/foo/bar/baz/", b"", Acl::OPEN, flags, true)
        .await
        .expect("create");
    assert_eq!(first, "/foo/bar/baz/0000000000");

    let second = conn
        .client
        .create("/foo/bar/baz/", b"", Acl::OPEN, flags, true)
        .await
        .expect("create");
    assert_eq!(second, "/foo/bar/baz/0000000001");

    // Deleting an entry does not free its counter value.
    conn.client.delete(&second).await.expect("delete");
    let third = conn
        .client
        .create("/foo/bar/baz/item_", b"", Acl::OPEN, flags, true)
        .await
        .expect("create");
    assert_eq!(third, "/foo/bar/baz/item_0000000002");
}

#[tokio::test]
async fn ephemerals_survive_reconnection_but_not_expiry() {
    covey_testing::init_tracing();
    let cluster = SimulatedCluster::new();
    let conn = connect(&cluster).await;
    let flags = CreateFlags { ephemeral: true, sequential: false };
    conn.client
        .create("/eph", b"", Acl::OPEN, flags, true)
        .await
        .expect("create");

    // A partition alone leaves the entry in place.
    cluster.shutdown_network();
    assert!(cluster.node_exists("/eph"));

    // Healing expires every session the outage orphaned.
    cluster.start_network();
    assert!(!cluster.node_exists("/eph"));
    assert_eq!(conn.client.exists("/eph").await, Err(CoordinationError::SessionExpired));
}
