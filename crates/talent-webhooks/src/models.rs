//! Webhook domain types: event taxonomy, wire payload, subscription and
//! delivery records, and the request/response shapes of the control API.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

// ---------------------------------------------------------------------------
// Event taxonomy
// ---------------------------------------------------------------------------

/// Closed set of event kinds shared by producers and subscriptions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
pub enum WebhookEventType {
    #[serde(rename = "requisition.created")]
    RequisitionCreated,
    #[serde(rename = "requisition.approved")]
    RequisitionApproved,
    #[serde(rename = "requisition.rejected")]
    RequisitionRejected,
    #[serde(rename = "requisition.filled")]
    RequisitionFilled,
    #[serde(rename = "application.created")]
    ApplicationCreated,
    #[serde(rename = "application.stage_changed")]
    ApplicationStageChanged,
    #[serde(rename = "application.rejected")]
    ApplicationRejected,
    #[serde(rename = "application.scored")]
    ApplicationScored,
    #[serde(rename = "interview.scheduled")]
    InterviewScheduled,
    #[serde(rename = "interview.rescheduled")]
    InterviewRescheduled,
    #[serde(rename = "interview.cancelled")]
    InterviewCancelled,
    #[serde(rename = "interview.completed")]
    InterviewCompleted,
    #[serde(rename = "scorecard.submitted")]
    ScorecardSubmitted,
    #[serde(rename = "scorecard.overdue")]
    ScorecardOverdue,
    #[serde(rename = "offer.created")]
    OfferCreated,
    #[serde(rename = "offer.sent")]
    OfferSent,
    #[serde(rename = "offer.accepted")]
    OfferAccepted,
    #[serde(rename = "offer.declined")]
    OfferDeclined,
    #[serde(rename = "check.initiated")]
    CheckInitiated,
    #[serde(rename = "check.completed")]
    CheckCompleted,
    #[serde(rename = "check.failed")]
    CheckFailed,
    #[serde(rename = "candidate.created")]
    CandidateCreated,
    #[serde(rename = "candidate.updated")]
    CandidateUpdated,
    #[serde(rename = "candidate.anonymized")]
    CandidateAnonymized,
}

impl WebhookEventType {
    /// Every event kind, grouped by category.
    #[must_use]
    pub fn all() -> Vec<Self> {
        use WebhookEventType::*;
        vec![
            RequisitionCreated,
            RequisitionApproved,
            RequisitionRejected,
            RequisitionFilled,
            ApplicationCreated,
            ApplicationStageChanged,
            ApplicationRejected,
            ApplicationScored,
            InterviewScheduled,
            InterviewRescheduled,
            InterviewCancelled,
            InterviewCompleted,
            ScorecardSubmitted,
            ScorecardOverdue,
            OfferCreated,
            OfferSent,
            OfferAccepted,
            OfferDeclined,
            CheckInitiated,
            CheckCompleted,
            CheckFailed,
            CandidateCreated,
            CandidateUpdated,
            CandidateAnonymized,
        ]
    }

    /// Wire name, e.g. `application.stage_changed`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequisitionCreated => "requisition.created",
            Self::RequisitionApproved => "requisition.approved",
            Self::RequisitionRejected => "requisition.rejected",
            Self::RequisitionFilled => "requisition.filled",
            Self::ApplicationCreated => "application.created",
            Self::ApplicationStageChanged => "application.stage_changed",
            Self::ApplicationRejected => "application.rejected",
            Self::ApplicationScored => "application.scored",
            Self::InterviewScheduled => "interview.scheduled",
            Self::InterviewRescheduled => "interview.rescheduled",
            Self::InterviewCancelled => "interview.cancelled",
            Self::InterviewCompleted => "interview.completed",
            Self::ScorecardSubmitted => "scorecard.submitted",
            Self::ScorecardOverdue => "scorecard.overdue",
            Self::OfferCreated => "offer.created",
            Self::OfferSent => "offer.sent",
            Self::OfferAccepted => "offer.accepted",
            Self::OfferDeclined => "offer.declined",
            Self::CheckInitiated => "check.initiated",
            Self::CheckCompleted => "check.completed",
            Self::CheckFailed => "check.failed",
            Self::CandidateCreated => "candidate.created",
            Self::CandidateUpdated => "candidate.updated",
            Self::CandidateAnonymized => "candidate.anonymized",
        }
    }

    /// Parse a wire name. Returns `None` for unknown kinds.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().into_iter().find(|et| et.as_str() == s)
    }

    /// Category prefix of the event name.
    #[must_use]
    pub fn category(&self) -> &'static str {
        self.as_str()
            .split_once('.')
            .map_or("unknown", |(category, _)| category)
    }

    /// Human readable description for the event-type catalogue.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::RequisitionCreated => "A job requisition was opened",
            Self::RequisitionApproved => "A job requisition was approved",
            Self::RequisitionRejected => "A job requisition was rejected",
            Self::RequisitionFilled => "All openings of a requisition were filled",
            Self::ApplicationCreated => "A candidate applied to a job",
            Self::ApplicationStageChanged => "An application moved to another pipeline stage",
            Self::ApplicationRejected => "An application was rejected",
            Self::ApplicationScored => "An application received a score",
            Self::InterviewScheduled => "An interview was scheduled",
            Self::InterviewRescheduled => "An interview was moved to a new time",
            Self::InterviewCancelled => "An interview was cancelled",
            Self::InterviewCompleted => "An interview took place",
            Self::ScorecardSubmitted => "An interviewer submitted a scorecard",
            Self::ScorecardOverdue => "A scorecard is past its due date",
            Self::OfferCreated => "An offer was drafted",
            Self::OfferSent => "An offer was sent to the candidate",
            Self::OfferAccepted => "The candidate accepted an offer",
            Self::OfferDeclined => "The candidate declined an offer",
            Self::CheckInitiated => "A background check was started",
            Self::CheckCompleted => "A background check finished",
            Self::CheckFailed => "A background check could not be completed",
            Self::CandidateCreated => "A candidate profile was created",
            Self::CandidateUpdated => "A candidate profile was updated",
            Self::CandidateAnonymized => "A candidate profile was anonymized",
        }
    }
}

impl fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Unknown event type: {s}"))
    }
}

// ---------------------------------------------------------------------------
// Wire payload
// ---------------------------------------------------------------------------

/// JSON body delivered to webhook endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WebhookPayload {
    pub event: WebhookEventType,
    pub timestamp: DateTime<Utc>,
    pub organization_id: Uuid,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl WebhookPayload {
    /// Build a payload stamped with the current time.
    #[must_use]
    pub fn new(
        organization_id: Uuid,
        event: WebhookEventType,
        data: serde_json::Value,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
            organization_id,
            data,
            metadata,
        }
    }

    /// Serialize to the exact bytes that get signed and sent.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// Public view of a webhook subscription. The signing secret is never part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub url: String,
    pub events: Vec<WebhookEventType>,
    pub is_active: bool,
    pub failure_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

/// Creation response: the only place the secret is ever returned.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreatedWebhookSubscription {
    #[serde(flatten)]
    pub subscription: WebhookSubscription,
    pub secret: String,
}

/// Partial update of a subscription. Secret and owner are not patchable.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionPatch {
    pub url: Option<String>,
    pub events: Option<Vec<WebhookEventType>>,
    pub is_active: Option<bool>,
}

// ---------------------------------------------------------------------------
// Deliveries
// ---------------------------------------------------------------------------

/// Lifecycle state of a delivery job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Retrying,
    Success,
    Failed,
}

impl DeliveryStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// `success` and `failed` end the worker's ownership of a delivery.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One delivery job: a payload bound for one subscription, across all its attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub event: WebhookEventType,
    pub payload: WebhookPayload,
    /// Target URL captured at enqueue time.
    pub url: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub latency_ms: Option<u64>,
}

impl WebhookDelivery {
    /// New `pending` delivery for a subscription snapshot.
    #[must_use]
    pub fn pending(subscription: &WebhookSubscription, payload: WebhookPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id: subscription.id,
            event: payload.event,
            payload,
            url: subscription.url.clone(),
            status: DeliveryStatus::Pending,
            attempts: 0,
            created_at: Utc::now(),
            last_attempt_at: None,
            next_attempt_at: None,
            completed_at: None,
            response_status: None,
            response_body: None,
            error: None,
            latency_ms: None,
        }
    }
}

// ---------------------------------------------------------------------------
// API request / response shapes
// ---------------------------------------------------------------------------

/// Request body for creating a subscription.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateWebhookSubscriptionRequest {
    pub organization_id: Uuid,
    #[validate(length(min = 1, max = 2048))]
    pub url: String,
    #[serde(default)]
    pub events: Vec<String>,
}

/// Request body for patching a subscription.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateWebhookSubscriptionRequest {
    #[validate(length(min = 1, max = 2048))]
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

/// Query parameters for listing subscriptions.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ListSubscriptionsQuery {
    pub organization_id: Uuid,
}

/// Paginated subscription list.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookSubscriptionListResponse {
    pub items: Vec<WebhookSubscription>,
    pub total: usize,
}

/// Query parameters for delivery history.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct ListDeliveriesQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

/// Default page size of delivery history.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

/// Delivery history, most recent first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookDeliveryListResponse {
    pub items: Vec<WebhookDelivery>,
    pub limit: usize,
}

/// Request body for triggering an event.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TriggerEventRequest {
    pub organization_id: Uuid,
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
}

/// Response of a trigger call: how many deliveries were enqueued.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TriggerEventResponse {
    pub matched: usize,
}

/// Result of a synchronous test delivery.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TestWebhookResponse {
    pub success: bool,
}

/// One entry of the event-type catalogue.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventTypeInfo {
    pub event_type: String,
    pub category: String,
    pub description: String,
}

/// The event-type catalogue.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventTypeListResponse {
    pub event_types: Vec<EventTypeInfo>,
}
