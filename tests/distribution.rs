//! End-to-end distribution runs over in-memory duplex links.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::DuplexStream;
use tokio::task::JoinSet;

use swarmcast::{
    Channel, ChannelError, Config, MemoryStorage, PeerId, Pool, Storage, StrategyKind,
};

fn test_config() -> Config {
    Config {
        // Fast rounds with enough slots that nobody stays choked for long.
        choke_interval: Duration::from_millis(50),
        tit_for_tat_slots: 8,
        optimistic_slots: 2,
        completion_timeout: Some(Duration::from_secs(30)),
        ..Config::default()
    }
}

fn test_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// One channel per pool member, fully meshed over duplex pipes.
fn full_mesh(pool: &Pool, kind: StrategyKind, config: &Config) -> HashMap<PeerId, Arc<Channel>> {
    let ids: Vec<PeerId> = pool.everybody().to_vec();
    let mut links: HashMap<PeerId, Vec<(PeerId, DuplexStream)>> =
        ids.iter().map(|id| (id.clone(), Vec::new())).collect();
    for i in 0..ids.len() {
        for j in (i + 1)..ids.len() {
            let (a, b) = tokio::io::duplex(64 * 1024);
            links.get_mut(&ids[i]).unwrap().push((ids[j].clone(), a));
            links.get_mut(&ids[j]).unwrap().push((ids[i].clone(), b));
        }
    }
    ids.iter()
        .map(|id| {
            let channel = Channel::new(
                id.clone(),
                pool.clone(),
                kind,
                links.remove(id).unwrap(),
                config.clone(),
            )
            .unwrap();
            (id.clone(), Arc::new(channel))
        })
        .collect()
}

/// Runs one distribution on every channel concurrently, then flushes all.
async fn distribute(
    channels: &HashMap<PeerId, Arc<Channel>>,
    storages: &HashMap<PeerId, Arc<MemoryStorage>>,
    roots: &[PeerId],
) {
    let mut calls = JoinSet::new();
    for (id, channel) in channels {
        let channel = channel.clone();
        let storage: Arc<dyn Storage> = storages[id].clone();
        let roots = roots.to_vec();
        calls.spawn(async move { channel.multicast_storage(storage, &roots).await });
    }
    while let Some(result) = calls.join_next().await {
        result.unwrap().unwrap();
    }
    for channel in channels.values() {
        channel.flush().await.unwrap();
    }
}

fn storages_for(
    pool: &Pool,
    roots: &[PeerId],
    data: &[u8],
    piece_count: u32,
) -> HashMap<PeerId, Arc<MemoryStorage>> {
    pool.everybody()
        .iter()
        .map(|id| {
            let storage = if roots.contains(id) {
                MemoryStorage::from_bytes(data, piece_count)
            } else {
                MemoryStorage::empty(piece_count)
            };
            (id.clone(), Arc::new(storage))
        })
        .collect()
}

fn assert_all_complete(
    storages: &HashMap<PeerId, Arc<MemoryStorage>>,
    reference: &MemoryStorage,
) {
    let expected = reference.digest();
    for (id, storage) in storages {
        assert!(storage.is_complete(), "{id} is missing pieces");
        assert_eq!(storage.digest(), expected, "{id} holds different content");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_root_reaches_a_flat_pool() {
    let pool = Pool::flat(["a", "b", "c", "d"]);
    let roots = vec![PeerId::from("a")];
    let data = test_data(256);
    let reference = MemoryStorage::from_bytes(&data, 8);

    let channels = full_mesh(&pool, StrategyKind::Plain, &test_config());
    let storages = storages_for(&pool, &roots, &data, 8);
    distribute(&channels, &storages, &roots).await;

    assert_all_complete(&storages, &reference);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multiple_roots_share_the_load() {
    let pool = Pool::flat(["a", "b", "c", "d"]);
    let roots = vec![PeerId::from("a"), PeerId::from("b")];
    let data = test_data(512);
    let reference = MemoryStorage::from_bytes(&data, 16);

    let channels = full_mesh(&pool, StrategyKind::Plain, &test_config());
    let storages = storages_for(&pool, &roots, &data, 16);
    distribute(&channels, &storages, &roots).await;

    assert_all_complete(&storages, &reference);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_robber_distributes_across_collectives() {
    let pool = Pool::clustered([("left", ["a", "b"]), ("right", ["c", "d"])]);
    let roots = vec![PeerId::from("a")];
    let data = test_data(384);
    let reference = MemoryStorage::from_bytes(&data, 12);

    let channels = full_mesh(&pool, StrategyKind::Robber, &test_config());
    let storages = storages_for(&pool, &roots, &data, 12);
    distribute(&channels, &storages, &roots).await;

    assert_all_complete(&storages, &reference);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mob_distributes_across_collectives() {
    let pool = Pool::clustered([("left", ["a", "b"]), ("right", ["c", "d"])]);
    let roots = vec![PeerId::from("a")];
    let data = test_data(512);
    let reference = MemoryStorage::from_bytes(&data, 16);

    let channels = full_mesh(&pool, StrategyKind::Mob, &test_config());
    let storages = storages_for(&pool, &roots, &data, 16);
    distribute(&channels, &storages, &roots).await;

    assert_all_complete(&storages, &reference);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_back_to_back_distributions_reuse_the_channel() {
    let pool = Pool::flat(["a", "b", "c"]);
    let channels = full_mesh(&pool, StrategyKind::Plain, &test_config());

    let first_roots = vec![PeerId::from("a")];
    let first_data = test_data(128);
    let first = storages_for(&pool, &first_roots, &first_data, 4);
    distribute(&channels, &first, &first_roots).await;
    assert_all_complete(&first, &MemoryStorage::from_bytes(&first_data, 4));

    // Different content and a different root on the same channel.
    let second_roots = vec![PeerId::from("b")];
    let second_data = test_data(320);
    let second = storages_for(&pool, &second_roots, &second_data, 10);
    distribute(&channels, &second, &second_roots).await;
    assert_all_complete(&second, &MemoryStorage::from_bytes(&second_data, 10));
}

#[tokio::test]
async fn test_multicast_rejects_bad_preconditions() {
    let pool = Pool::flat(["a", "b"]);
    let (link, _far_end) = tokio::io::duplex(1024);
    let channel = Channel::new(
        "a",
        pool,
        StrategyKind::Plain,
        vec![(PeerId::from("b"), link)],
        test_config(),
    )
    .unwrap();

    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::from_bytes(&test_data(16), 2));
    assert!(matches!(
        channel.multicast_storage(storage.clone(), &[]).await,
        Err(ChannelError::Config(_))
    ));
    assert!(matches!(
        channel
            .multicast_storage(storage.clone(), &[PeerId::from("outsider")])
            .await,
        Err(ChannelError::Config(_))
    ));

    let empty: Arc<dyn Storage> = Arc::new(MemoryStorage::empty(0));
    assert!(matches!(
        channel.multicast_storage(empty, &[PeerId::from("a")]).await,
        Err(ChannelError::Config(_))
    ));
}

#[tokio::test]
async fn test_new_rejects_topology_errors() {
    let pool = Pool::flat(["a", "b"]);
    let config = test_config();

    let (link, _far_end) = tokio::io::duplex(64);
    assert!(Channel::new(
        "outsider",
        pool.clone(),
        StrategyKind::Plain,
        vec![(PeerId::from("b"), link)],
        config.clone(),
    )
    .is_err());

    let (link, _far_end) = tokio::io::duplex(64);
    assert!(Channel::new(
        "a",
        pool.clone(),
        StrategyKind::Plain,
        vec![(PeerId::from("a"), link)],
        config.clone(),
    )
    .is_err());

    let (link, _far_end) = tokio::io::duplex(64);
    assert!(Channel::new(
        "a",
        pool.clone(),
        StrategyKind::Plain,
        vec![(PeerId::from("outsider"), link)],
        config.clone(),
    )
    .is_err());

    let (first, _far_first) = tokio::io::duplex(64);
    let (second, _far_second) = tokio::io::duplex(64);
    assert!(Channel::new(
        "a",
        pool,
        StrategyKind::Plain,
        vec![(PeerId::from("b"), first), (PeerId::from("b"), second)],
        config,
    )
    .is_err());
}

#[tokio::test]
async fn test_flush_and_close_on_an_idle_channel() {
    let pool = Pool::flat(["a", "b"]);
    let (link, _far_end) = tokio::io::duplex(64);
    let mut channel = Channel::new(
        "a",
        pool,
        StrategyKind::Plain,
        vec![(PeerId::from("b"), link)],
        test_config(),
    )
    .unwrap();

    channel.flush().await.unwrap();
    channel.close().await.unwrap();
    // Idempotent.
    channel.close().await.unwrap();

    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::from_bytes(&test_data(16), 2));
    assert!(matches!(
        channel.multicast_storage(storage, &[PeerId::from("a")]).await,
        Err(ChannelError::Closed)
    ));
}
