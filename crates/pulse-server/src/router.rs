//! Inbound frame dispatch.
//!
//! One task drains the shared inbound queue, so frames from a single
//! connection are handled in arrival order. Recoverable problems (bad JSON,
//! unknown type, permission denial) answer the sender with one error frame
//! and leave the connection registered.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use pulse_core::events::{TaskUpdate, UpdateEvent};
use pulse_core::ids::ConnectionId;
use pulse_core::{Identity, PermissionOracle};
use pulse_store::tasks::TaskRepo;
use pulse_store::StoreError;
use pulse_telemetry::ServerMetrics;

use crate::broadcast::Broadcaster;
use crate::connection::SendError;
use crate::frames::{self, Frame};
use crate::registry::ConnectionRegistry;

/// Everything the router needs to handle a frame.
pub struct RouterContext {
    pub registry: Arc<ConnectionRegistry>,
    pub oracle: Arc<dyn PermissionOracle>,
    pub broadcaster: Arc<Broadcaster>,
    pub tasks: TaskRepo,
    pub metrics: Arc<ServerMetrics>,
}

/// Drain the inbound queue until every sender is gone.
pub async fn run_router(mut rx: mpsc::Receiver<(ConnectionId, String)>, ctx: RouterContext) {
    while let Some((conn_id, raw)) = rx.recv().await {
        ctx.metrics.frame_received();
        handle_frame(&ctx, &conn_id, &raw).await;
    }
    debug!("inbound queue closed, router stopping");
}

async fn handle_frame(ctx: &RouterContext, conn_id: &ConnectionId, raw: &str) {
    let frame = match Frame::parse(raw) {
        Ok(frame) => frame,
        Err(_) => {
            reply(ctx, conn_id, Frame::error(frames::ERR_INVALID_FORMAT));
            return;
        }
    };

    match frame.kind.as_str() {
        frames::TYPE_SUBSCRIBE => handle_subscribe(ctx, conn_id, frame.channel).await,
        frames::TYPE_UNSUBSCRIBE => handle_unsubscribe(ctx, conn_id, frame.channel),
        frames::TYPE_TASK_UPDATE => handle_task_update(ctx, conn_id, frame.data).await,
        frames::TYPE_PING => reply(ctx, conn_id, Frame::pong()),
        other => {
            debug!(connection_id = %conn_id, kind = other, "unknown message type");
            reply(ctx, conn_id, Frame::error(format!("unknown message type: {other}")));
        }
    }
}

async fn handle_subscribe(ctx: &RouterContext, conn_id: &ConnectionId, channel: Option<String>) {
    let Some(channel) = channel else {
        reply(ctx, conn_id, Frame::error(frames::ERR_INVALID_FORMAT));
        return;
    };
    let Some(owner) = require_owner(ctx, conn_id) else {
        return;
    };

    match ctx.oracle.can_subscribe(&owner, &channel).await {
        Ok(true) => {
            if let Err(e) = ctx.registry.subscribe(conn_id, &channel) {
                // Raced a disconnect; nothing to answer.
                warn!(connection_id = %conn_id, error = %e, "subscribe after removal");
                return;
            }
            debug!(connection_id = %conn_id, channel, "subscribed");
            reply(ctx, conn_id, Frame::subscribed(channel));
        }
        Ok(false) => {
            reply(ctx, conn_id, Frame::error(frames::ERR_SUBSCRIPTION_DENIED));
        }
        Err(e) => {
            // Oracle failure denies the action; the connection stays.
            warn!(connection_id = %conn_id, channel, error = %e, "subscription check failed");
            reply(ctx, conn_id, Frame::error(frames::ERR_SUBSCRIPTION_DENIED));
        }
    }
}

/// Dropping interest can never leak data, so no permission check here.
fn handle_unsubscribe(ctx: &RouterContext, conn_id: &ConnectionId, channel: Option<String>) {
    let Some(channel) = channel else {
        reply(ctx, conn_id, Frame::error(frames::ERR_INVALID_FORMAT));
        return;
    };
    if let Err(e) = ctx.registry.unsubscribe(conn_id, &channel) {
        warn!(connection_id = %conn_id, error = %e, "unsubscribe after removal");
        return;
    }
    reply(ctx, conn_id, Frame::unsubscribed(channel));
}

async fn handle_task_update(
    ctx: &RouterContext,
    conn_id: &ConnectionId,
    data: Option<serde_json::Value>,
) {
    let update: TaskUpdate = match data.map(serde_json::from_value) {
        Some(Ok(update)) => update,
        _ => {
            reply(ctx, conn_id, Frame::error(frames::ERR_INVALID_FORMAT));
            return;
        }
    };
    let Some(owner) = require_owner(ctx, conn_id) else {
        return;
    };

    match ctx.oracle.can_modify(&owner, &update.task_id).await {
        Ok(true) => {}
        Ok(false) => {
            reply(ctx, conn_id, Frame::error(frames::ERR_PERMISSION_DENIED));
            return;
        }
        Err(e) => {
            warn!(connection_id = %conn_id, task_id = %update.task_id, error = %e, "modify check failed");
            reply(ctx, conn_id, Frame::error(frames::ERR_PERMISSION_DENIED));
            return;
        }
    }

    let stored = match ctx.tasks.apply_update(&update) {
        Ok(row) => row,
        Err(StoreError::NotFound(_)) => {
            reply(ctx, conn_id, Frame::error("task not found"));
            return;
        }
        Err(e) => {
            warn!(task_id = %update.task_id, error = %e, "task update failed");
            reply(ctx, conn_id, Frame::error("task update failed"));
            return;
        }
    };

    // Fan out the stored state; the event's project id may come from the
    // store when the sender omitted it.
    let event = UpdateEvent::Task(TaskUpdate {
        task_id: stored.id,
        project_id: update.project_id.or(stored.project_id),
        team_id: update.team_id,
        assignee_id: stored.assignee_id,
        status: Some(stored.status),
        title: Some(stored.title),
    });
    let _ = ctx.broadcaster.broadcast(&event);
}

fn require_owner(ctx: &RouterContext, conn_id: &ConnectionId) -> Option<Identity> {
    let owner = ctx.registry.owner(conn_id);
    if owner.is_none() {
        // A frame from a connection that is already gone: log and drop.
        warn!(connection_id = %conn_id, "frame from unknown connection");
    }
    owner
}

fn reply(ctx: &RouterContext, conn_id: &ConnectionId, frame: Frame) {
    match ctx.registry.send(conn_id, frame.encode()) {
        Ok(()) => ctx.metrics.frame_sent(),
        Err(SendError::Full) => ctx.metrics.send_failure(),
        Err(SendError::Closed) => {
            ctx.metrics.send_failure();
            let _ = ctx.registry.remove(conn_id);
        }
    }
}
