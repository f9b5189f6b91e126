/// The registry runtime event loop.
///
/// A single async task that owns the registry, the local node and the
/// payment-vote ledger, and multiplexes over inbound gossip, application
/// commands and timers.
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::active::ActiveNode;
use crate::chain::ChainView;
use crate::election::last_paid_depth;
use crate::error::RegistryError;
use crate::payments::PaymentVotes;
use crate::queries::payee_history;
use crate::registry::Registry;
use crate::types::now_secs;
use crate::wire::GossipMessage;

use super::executor::execute_effects;
use super::transport::GossipSink;
use super::{InboundGossip, RuntimeCommand, RuntimeConfig};

/// Main event loop.
pub(super) async fn runtime_loop<S: GossipSink>(
    mut registry: Registry,
    mut active: Option<ActiveNode>,
    chain: Arc<dyn ChainView>,
    sink: S,
    config: RuntimeConfig,
    mut cmd_rx: mpsc::Receiver<RuntimeCommand>,
    mut inbound_rx: mpsc::Receiver<InboundGossip>,
) {
    let chain = chain.as_ref();
    let mut votes = PaymentVotes::new();

    if let Some(path) = &config.persist_path {
        match registry.load(path, false, now_secs()) {
            Ok(()) => tracing::info!("loaded registry cache: {registry}"),
            Err(e) => tracing::warn!("registry cache not loaded, starting empty: {e}"),
        }
    }

    // ── Timers ──────────────────────────────────────────────────────
    let mut check_tick = tokio::time::interval(config.check_interval);
    let mut active_tick = tokio::time::interval(config.active_interval);
    let mut checks: u32 = 0;

    // Skip the immediate first tick
    check_tick.tick().await;
    active_tick.tick().await;

    let shutdown_ack = loop {
        tokio::select! {
            biased;

            // ── 1. Inbound gossip ───────────────────────────────
            Some(InboundGossip { peer, bytes }) = inbound_rx.recv() => {
                let message = match GossipMessage::from_bytes(&bytes) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::debug!("bad gossip from {peer}: {e}");
                        continue;
                    }
                };
                let effects = registry.process_message(peer, message, chain, now_secs());
                execute_effects(effects, &sink, &mut registry, &mut active).await;
            }

            // ── 2. Application commands ─────────────────────────
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    // every handle dropped
                    break None;
                };
                match cmd {
                    RuntimeCommand::RequestFullList { peer } => {
                        let effects = registry.request_full_list(peer, now_secs());
                        execute_effects(effects, &sink, &mut registry, &mut active).await;
                    }
                    RuntimeCommand::AddPaymentVote { height, script, increment } => {
                        votes.add_payee(height, &script, increment);
                    }
                    RuntimeCommand::AnnounceLocal { outpoint, addr, collateral_secret, reply } => {
                        let result = match active.as_mut() {
                            Some(node) => node.announce(
                                &mut registry, chain, outpoint, addr, &collateral_secret, now_secs(),
                            ),
                            None => Err(RegistryError::InvalidKey(
                                "no operator key configured".into(),
                            )),
                        };
                        let result = match result {
                            Ok(effects) => {
                                execute_effects(effects, &sink, &mut registry, &mut active).await;
                                Ok(())
                            }
                            Err(e) => Err(e),
                        };
                        let _ = reply.send(result);
                    }
                    RuntimeCommand::GetCounts { reply } => {
                        let _ = reply.send(registry.node_counts(now_secs()));
                    }
                    RuntimeCommand::GetRanks { height, reply } => {
                        let _ = reply.send(registry.rank_list(chain, &votes, height, now_secs()));
                    }
                    RuntimeCommand::GetQueuePosition { reply } => {
                        let _ = reply.send(registry.queue_position(chain, &votes, now_secs()));
                    }
                    RuntimeCommand::GetPayeeHistory { from, to, reply } => {
                        let _ = reply.send(payee_history(&votes, from, to));
                    }
                    RuntimeCommand::GetMetrics { reply } => {
                        let _ = reply.send(registry.metrics().snapshot());
                    }
                    RuntimeCommand::GetActiveStatus { reply } => {
                        let _ = reply.send(active.as_ref().map(ActiveNode::status_message));
                    }
                    RuntimeCommand::Save { reply } => {
                        let result = match &config.persist_path {
                            Some(path) => registry.dump(path),
                            None => Ok(()),
                        };
                        let _ = reply.send(result);
                    }
                    RuntimeCommand::Shutdown { done } => {
                        break Some(done);
                    }
                }
            }

            // ── 3. Timer: health checks and sweeps ──────────────
            _ = check_tick.tick() => {
                let now = now_secs();
                registry.check(now);
                checks += 1;
                if checks >= config.sweep_every {
                    checks = 0;
                    let purged = registry.check_and_remove(false, now);
                    if let Some(tip) = chain.tip_height() {
                        let keep = last_paid_depth(registry.len()) as u32;
                        votes.prune_below(tip.saturating_sub(keep));
                    }
                    tracing::debug!("sweep purged {purged}: {registry}");
                }
            }

            // ── 4. Timer: local node ────────────────────────────
            _ = active_tick.tick(), if active.is_some() => {
                let effects = match active.as_mut() {
                    Some(node) => node.manage_status(&mut registry, chain, now_secs()),
                    None => Vec::new(),
                };
                execute_effects(effects, &sink, &mut registry, &mut active).await;
            }

            else => break None,
        }
    };

    // Graceful shutdown
    if let Some(path) = &config.persist_path {
        if let Err(e) = registry.dump(path) {
            tracing::warn!("registry cache not written: {e}");
        }
    }
    tracing::info!("registry runtime stopped: {registry}");
    if let Some(done) = shutdown_ack {
        let _ = done.send(());
    }
}
