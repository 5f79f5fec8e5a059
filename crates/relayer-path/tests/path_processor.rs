//! End-to-end scenarios driven through the public path processor API with
//! mock chain providers.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};

use ibc_relayer_path::cache::{ChainProcessorCacheData, ChannelStateCache, IbcHeaderCache};
use ibc_relayer_path::chain::{ChainProvider, IbcMessage, Proof, ProofRequest, ProviderError};
use ibc_relayer_path::config::{PacketFilter, PathEnd};
use ibc_relayer_path::processor::{
    MessageLifecycle, PacketMessage, PacketMessageLifecycle, PathProcessor,
};
use ibc_relayer_path_types::{
    ChainId, ChannelId, ChannelKey, ClientId, ClientState, ConnectionId, Height, IbcHeader,
    LatestBlock, PacketAction, PacketInfo, PortId, TimeoutHeight, Timestamp,
};

#[derive(Debug)]
struct MockHeader {
    height: u64,
}

impl IbcHeader for MockHeader {
    fn height(&self) -> u64 {
        self.height
    }

    fn timestamp_nanos(&self) -> u64 {
        self.height * 1_000_000_000
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct MockProvider {
    chain_id: ChainId,
    assemblies: Mutex<Vec<Vec<IbcMessage>>>,
    send_attempts: AtomicUsize,
    fail_next_sends: AtomicUsize,
}

impl MockProvider {
    fn new(chain_id: &str) -> Arc<Self> {
        Arc::new(Self {
            chain_id: ChainId::new(chain_id),
            assemblies: Mutex::new(Vec::new()),
            send_attempts: AtomicUsize::new(0),
            fail_next_sends: AtomicUsize::new(0),
        })
    }

    fn assemblies(&self) -> Vec<Vec<IbcMessage>> {
        self.assemblies.lock().unwrap().clone()
    }

    fn fail_next_send(&self) {
        self.fail_next_sends.fetch_add(1, Ordering::SeqCst);
    }

    fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainProvider for MockProvider {
    fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    async fn query_proof(
        &self,
        _request: ProofRequest,
        height: u64,
    ) -> Result<Proof, ProviderError> {
        Ok(Proof {
            bytes: vec![0xAB],
            height,
        })
    }

    async fn send_messages(&self, messages: Vec<IbcMessage>) -> Result<(), ProviderError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_next_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::broadcast("scripted failure".to_string()));
        }
        self.assemblies.lock().unwrap().push(messages);
        Ok(())
    }
}

const CHAIN_A: &str = "chain-a";
const CHAIN_B: &str = "chain-b";

fn chain_a() -> ChainId {
    ChainId::new(CHAIN_A)
}

fn chain_b() -> ChainId {
    ChainId::new(CHAIN_B)
}

fn path_end(chain: &str, client: &str) -> PathEnd {
    PathEnd::new(
        ChainId::new(chain),
        ClientId::new(client),
        ConnectionId::new("connection-0"),
        PacketFilter::AllowAll,
    )
}

fn processor() -> PathProcessor {
    PathProcessor::new(
        path_end(CHAIN_A, "07-tendermint-0"),
        path_end(CHAIN_B, "07-tendermint-1"),
    )
}

fn key_on_a() -> ChannelKey {
    ChannelKey {
        channel_id: ChannelId::new("channel-0"),
        port_id: PortId::new("transfer"),
        counterparty_channel_id: ChannelId::new("channel-1"),
        counterparty_port_id: PortId::new("transfer"),
    }
}

fn transfer_info(sequence: u64, timeout_height: u64) -> PacketInfo {
    PacketInfo {
        height: 0,
        source_port: PortId::new("transfer"),
        source_channel: ChannelId::new("channel-0"),
        dest_port: PortId::new("transfer"),
        dest_channel: ChannelId::new("channel-1"),
        sequence: sequence.into(),
        data: b"coins".to_vec(),
        timeout_height: if timeout_height == 0 {
            TimeoutHeight::Never
        } else {
            TimeoutHeight::At(Height::new(0, timeout_height))
        },
        timeout_timestamp: Timestamp::default(),
        ack: None,
    }
}

fn client_state(client: &str, consensus_height: u64) -> ClientState {
    ClientState {
        client_id: ClientId::new(client),
        consensus_height: Height::new(0, consensus_height),
    }
}

fn headers_at(heights: &[u64]) -> IbcHeaderCache {
    let mut cache = IbcHeaderCache::default();
    for height in heights {
        cache.insert(*height, Arc::new(MockHeader { height: *height }));
    }
    cache
}

fn open_channels(key: &ChannelKey, open: bool) -> ChannelStateCache {
    let mut cache = ChannelStateCache::default();
    cache.insert(key.clone(), open);
    cache
}

/// Base snapshot for side A: in sync at `height` with the channel open and
/// recent headers cached.
fn snapshot_a(height: u64, consensus_of_b: u64) -> ChainProcessorCacheData {
    ChainProcessorCacheData {
        in_sync: true,
        client_state: Some(client_state("07-tendermint-0", consensus_of_b)),
        channel_state_cache: open_channels(&key_on_a(), true),
        latest_block: Some(LatestBlock {
            height,
            time: Timestamp::from_nanoseconds(height * 1_000_000_000),
        }),
        ibc_header_cache: headers_at(&[height]),
        ..Default::default()
    }
}

fn snapshot_b(height: u64, consensus_of_a: u64) -> ChainProcessorCacheData {
    ChainProcessorCacheData {
        in_sync: true,
        client_state: Some(client_state("07-tendermint-1", consensus_of_a)),
        channel_state_cache: open_channels(&key_on_a().counterparty(), true),
        latest_block: Some(LatestBlock {
            height,
            time: Timestamp::from_nanoseconds(height * 1_000_000_000),
        }),
        ibc_header_cache: headers_at(&[height]),
        ..Default::default()
    }
}

async fn wait_for<T>(mut probe: impl FnMut() -> Option<T>) -> T {
    timeout(Duration::from_secs(5), async {
        loop {
            if let Some(value) = probe() {
                return value;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for condition")
}

async fn nth_assembly(provider: &Arc<MockProvider>, n: usize) -> Vec<IbcMessage> {
    let provider = provider.clone();
    wait_for(move || provider.assemblies().get(n).cloned()).await
}

#[test_log::test(tokio::test)]
async fn packet_happy_path_emits_recv_then_ack() {
    let mut processor = processor();
    let provider_a = MockProvider::new(CHAIN_A);
    let provider_b = MockProvider::new(CHAIN_B);
    assert!(processor.set_chain_provider(provider_a.clone()));
    assert!(processor.set_chain_provider(provider_b.clone()));

    let handle = processor.handle();
    let shutdown = processor.shutdown_handle();
    let worker = tokio::spawn(processor.run(None));

    // A transfer at height 100 on chain A, nothing matching on chain B yet.
    let info = transfer_info(7, 0);
    let mut data_a = snapshot_a(100, 10);
    data_a.ibc_messages_cache.packet_flow.retain_message(
        key_on_a(),
        PacketAction::Transfer,
        7.into(),
        info.clone(),
    );
    handle.handle_new_data(&chain_a(), data_a).await;

    // Chain B's client of A only covers height 50, so the receive needs a
    // client update at 100 first.
    handle.handle_new_data(&chain_b(), snapshot_b(60, 50)).await;

    let assembly = nth_assembly(&provider_b, 0).await;
    assert_eq!(assembly.len(), 2);
    match &assembly[0] {
        IbcMessage::UpdateClient { client_id, header } => {
            assert_eq!(client_id, &ClientId::new("07-tendermint-1"));
            assert_eq!(header.height(), 100);
        }
        other => panic!("expected client update first, got {other:?}"),
    }
    match &assembly[1] {
        IbcMessage::Packet {
            action: PacketAction::RecvPacket,
            info: sent,
            proof: Some(proof),
        } => {
            assert_eq!(sent.sequence, 7.into());
            assert_eq!(proof.height, 100);
        }
        other => panic!("expected recv packet, got {other:?}"),
    }

    // Chain B reports the receive; chain A still lacks the ack, so the next
    // round sends [update client @ B height, ack] toward A.
    let mut data_b = snapshot_b(61, 50);
    data_b.ibc_messages_cache.packet_flow.retain_message(
        key_on_a().counterparty(),
        PacketAction::RecvPacket,
        7.into(),
        PacketInfo {
            ack: Some(b"ack".to_vec()),
            ..info.clone()
        },
    );
    handle.handle_new_data(&chain_b(), data_b).await;

    let assembly = nth_assembly(&provider_a, 0).await;
    assert_eq!(assembly.len(), 2);
    match &assembly[0] {
        IbcMessage::UpdateClient { client_id, header } => {
            assert_eq!(client_id, &ClientId::new("07-tendermint-0"));
            assert_eq!(header.height(), 61);
        }
        other => panic!("expected client update first, got {other:?}"),
    }
    match &assembly[1] {
        IbcMessage::Packet {
            action: PacketAction::Acknowledgement,
            info: sent,
            proof: Some(proof),
        } => {
            assert_eq!(sent.sequence, 7.into());
            assert_eq!(sent.ack.as_deref(), Some(b"ack".as_slice()));
            assert_eq!(proof.height, 61);
        }
        other => panic!("expected acknowledgement, got {other:?}"),
    }

    shutdown.cancel();
    timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker did not stop")
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn duplicate_receive_snapshots_emit_one_acknowledgement() {
    let mut processor = processor();
    let provider_a = MockProvider::new(CHAIN_A);
    let provider_b = MockProvider::new(CHAIN_B);
    processor.set_chain_provider(provider_a.clone());
    processor.set_chain_provider(provider_b.clone());

    let handle = processor.handle();
    let shutdown = processor.shutdown_handle();
    let worker = tokio::spawn(processor.run(None));

    let info = transfer_info(7, 0);
    // A's client of B already covers B's height, so the ack assembly has no
    // client update in it.
    let mut data_a = snapshot_a(100, 1_000);
    data_a.ibc_messages_cache.packet_flow.retain_message(
        key_on_a(),
        PacketAction::Transfer,
        7.into(),
        info.clone(),
    );
    handle.handle_new_data(&chain_a(), data_a).await;

    let recv = PacketInfo {
        ack: Some(b"ack".to_vec()),
        ..info
    };
    // The same receive arrives in two independent snapshots.
    for _ in 0..2 {
        let mut data_b = snapshot_b(60, 1_000);
        data_b.ibc_messages_cache.packet_flow.retain_message(
            key_on_a().counterparty(),
            PacketAction::RecvPacket,
            7.into(),
            recv.clone(),
        );
        handle.handle_new_data(&chain_b(), data_b).await;
    }

    let assembly = nth_assembly(&provider_a, 0).await;
    assert_eq!(assembly.len(), 1);
    assert!(matches!(
        &assembly[0],
        IbcMessage::Packet {
            action: PacketAction::Acknowledgement,
            ..
        }
    ));

    // Give any spurious duplicate a chance to show up.
    sleep(Duration::from_millis(200)).await;
    assert_eq!(provider_a.assemblies().len(), 1);
    assert!(provider_b.assemblies().is_empty());

    shutdown.cancel();
    timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker did not stop")
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn expired_packet_times_out_toward_the_source() {
    let mut processor = processor();
    let provider_a = MockProvider::new(CHAIN_A);
    let provider_b = MockProvider::new(CHAIN_B);
    processor.set_chain_provider(provider_a.clone());
    processor.set_chain_provider(provider_b.clone());

    let handle = processor.handle();
    let shutdown = processor.shutdown_handle();
    let worker = tokio::spawn(processor.run(None));

    // Transfer with timeout height 50; chain B is already at 60.
    let mut data_a = snapshot_a(100, 1_000);
    data_a.ibc_messages_cache.packet_flow.retain_message(
        key_on_a(),
        PacketAction::Transfer,
        9.into(),
        transfer_info(9, 50),
    );
    handle.handle_new_data(&chain_a(), data_a).await;
    handle.handle_new_data(&chain_b(), snapshot_b(60, 1_000)).await;

    let assembly = nth_assembly(&provider_a, 0).await;
    assert_eq!(assembly.len(), 1);
    match &assembly[0] {
        IbcMessage::Packet {
            action: PacketAction::Timeout,
            info,
            proof: Some(proof),
        } => {
            assert_eq!(info.sequence, 9.into());
            assert_eq!(proof.height, 60);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(provider_b.assemblies().is_empty());

    shutdown.cancel();
    timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker did not stop")
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn expired_packet_on_closed_channel_times_out_on_close() {
    let mut processor = processor();
    let provider_a = MockProvider::new(CHAIN_A);
    let provider_b = MockProvider::new(CHAIN_B);
    processor.set_chain_provider(provider_a.clone());
    processor.set_chain_provider(provider_b.clone());

    let handle = processor.handle();
    let shutdown = processor.shutdown_handle();
    let worker = tokio::spawn(processor.run(None));

    let mut data_a = snapshot_a(100, 1_000);
    data_a.ibc_messages_cache.packet_flow.retain_message(
        key_on_a(),
        PacketAction::Transfer,
        9.into(),
        transfer_info(9, 50),
    );
    handle.handle_new_data(&chain_a(), data_a).await;

    let mut data_b = snapshot_b(60, 1_000);
    data_b.channel_state_cache = open_channels(&key_on_a().counterparty(), false);
    handle.handle_new_data(&chain_b(), data_b).await;

    let assembly = nth_assembly(&provider_a, 0).await;
    assert!(matches!(
        &assembly[0],
        IbcMessage::Packet {
            action: PacketAction::TimeoutOnClose,
            ..
        }
    ));

    shutdown.cancel();
    timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker did not stop")
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn lifecycle_termination_stops_the_worker() {
    let mut processor = processor();
    let provider_a = MockProvider::new(CHAIN_A);
    let provider_b = MockProvider::new(CHAIN_B);
    processor.set_chain_provider(provider_a.clone());
    processor.set_chain_provider(provider_b.clone());

    let handle = processor.handle();
    let lifecycle = MessageLifecycle::Packet(PacketMessageLifecycle {
        initial: None,
        termination: Some(PacketMessage {
            chain_id: chain_a(),
            action: PacketAction::Acknowledgement,
            info: transfer_info(7, 0),
        }),
    });
    let worker = tokio::spawn(processor.run(Some(lifecycle)));

    handle.handle_new_data(&chain_a(), snapshot_a(100, 1_000)).await;
    handle.handle_new_data(&chain_b(), snapshot_b(60, 1_000)).await;

    // The acknowledgement for sequence 7 lands on chain A: terminal.
    let mut data_a = snapshot_a(101, 1_000);
    data_a.ibc_messages_cache.packet_flow.retain_message(
        key_on_a(),
        PacketAction::Acknowledgement,
        7.into(),
        transfer_info(7, 0),
    );
    handle.handle_new_data(&chain_a(), data_a).await;

    timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker did not stop after observing termination")
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn initial_lifecycle_message_is_submitted_once() {
    let mut processor = processor();
    let provider_a = MockProvider::new(CHAIN_A);
    let provider_b = MockProvider::new(CHAIN_B);
    processor.set_chain_provider(provider_a.clone());
    processor.set_chain_provider(provider_b.clone());

    let handle = processor.handle();
    let shutdown = processor.shutdown_handle();
    let lifecycle = MessageLifecycle::Packet(PacketMessageLifecycle {
        initial: Some(PacketMessage {
            chain_id: chain_a(),
            action: PacketAction::Transfer,
            info: transfer_info(1, 0),
        }),
        termination: None,
    });
    let worker = tokio::spawn(processor.run(Some(lifecycle)));

    handle.handle_new_data(&chain_a(), snapshot_a(100, 1_000)).await;
    handle.handle_new_data(&chain_b(), snapshot_b(60, 1_000)).await;

    let assembly = nth_assembly(&provider_a, 0).await;
    assert_eq!(assembly.len(), 1);
    match &assembly[0] {
        IbcMessage::Packet {
            action: PacketAction::Transfer,
            proof,
            ..
        } => assert!(proof.is_none()),
        other => panic!("expected locally initiated transfer, got {other:?}"),
    }

    // Further rounds do not resubmit the initial message.
    handle.handle_new_data(&chain_a(), snapshot_a(101, 1_000)).await;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(provider_a.assemblies().len(), 1);

    shutdown.cancel();
    timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker did not stop")
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn failed_send_is_retried_after_the_chain_advances() {
    let mut processor = processor();
    let provider_a = MockProvider::new(CHAIN_A);
    let provider_b = MockProvider::new(CHAIN_B);
    processor.set_chain_provider(provider_a.clone());
    processor.set_chain_provider(provider_b.clone());

    let handle = processor.handle();
    let shutdown = processor.shutdown_handle();
    let worker = tokio::spawn(processor.run(None));

    provider_b.fail_next_send();

    let mut data_a = snapshot_a(100, 1_000);
    data_a.ibc_messages_cache.packet_flow.retain_message(
        key_on_a(),
        PacketAction::Transfer,
        7.into(),
        transfer_info(7, 0),
    );
    handle.handle_new_data(&chain_a(), data_a).await;
    handle.handle_new_data(&chain_b(), snapshot_b(60, 1_000)).await;

    // First attempt fails against the scripted error.
    wait_for(|| (provider_b.send_attempts() >= 1).then_some(())).await;
    assert!(provider_b.assemblies().is_empty());

    // Two new blocks on the destination make the message eligible again.
    handle.handle_new_data(&chain_b(), snapshot_b(62, 1_000)).await;

    let assembly = nth_assembly(&provider_b, 0).await;
    assert!(matches!(
        &assembly[0],
        IbcMessage::Packet {
            action: PacketAction::RecvPacket,
            ..
        }
    ));
    assert_eq!(provider_b.send_attempts(), 2);

    shutdown.cancel();
    timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker did not stop")
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn subscribers_fire_in_registration_order_after_broadcast() {
    let mut processor = processor();
    let provider_a = MockProvider::new(CHAIN_A);
    let provider_b = MockProvider::new(CHAIN_B);
    processor.set_chain_provider(provider_a.clone());
    processor.set_chain_provider(provider_b.clone());

    let order: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    for tag in [1u8, 2] {
        let order = order.clone();
        assert!(processor.on_packet_message(
            &chain_b(),
            PacketAction::RecvPacket,
            Arc::new(move |info: &PacketInfo| {
                assert_eq!(info.sequence, 7.into());
                order.lock().unwrap().push(tag);
            }),
        ));
    }

    let handle = processor.handle();
    let shutdown = processor.shutdown_handle();
    let worker = tokio::spawn(processor.run(None));

    let mut data_a = snapshot_a(100, 1_000);
    data_a.ibc_messages_cache.packet_flow.retain_message(
        key_on_a(),
        PacketAction::Transfer,
        7.into(),
        transfer_info(7, 0),
    );
    handle.handle_new_data(&chain_a(), data_a).await;
    handle.handle_new_data(&chain_b(), snapshot_b(60, 1_000)).await;

    nth_assembly(&provider_b, 0).await;
    let fired = wait_for(|| {
        let fired = order.lock().unwrap().clone();
        (fired.len() == 2).then_some(fired)
    })
    .await;
    assert_eq!(fired, vec![1, 2]);

    shutdown.cancel();
    timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker did not stop")
        .unwrap();
}

#[test_log::test(tokio::test)]
async fn backlog_saturation_leaves_the_worker_responsive() {
    let mut processor = processor();
    let provider_a = MockProvider::new(CHAIN_A);
    let provider_b = MockProvider::new(CHAIN_B);
    processor.set_chain_provider(provider_a.clone());
    processor.set_chain_provider(provider_b.clone());

    let handle = processor.handle();
    let shutdown = processor.shutdown_handle();
    let worker = tokio::spawn(processor.run(None));

    // Saturate the retry signal far past its capacity; the excess is
    // dropped rather than queued, and the worker coalesces the rest.
    for _ in 0..100 {
        handle.process_backlog_if_ready();
    }

    let mut data_a = snapshot_a(100, 1_000);
    data_a.ibc_messages_cache.packet_flow.retain_message(
        key_on_a(),
        PacketAction::Transfer,
        3.into(),
        transfer_info(3, 0),
    );
    handle.handle_new_data(&chain_a(), data_a).await;
    handle.handle_new_data(&chain_b(), snapshot_b(60, 50)).await;

    let assembly = nth_assembly(&provider_b, 0).await;
    assert!(assembly
        .iter()
        .any(|m| matches!(m, IbcMessage::Packet { action: PacketAction::RecvPacket, .. })));

    shutdown.cancel();
    timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker did not stop")
        .unwrap();
}
