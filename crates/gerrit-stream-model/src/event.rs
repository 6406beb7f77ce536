//! Stream event envelope and per-kind bodies.

use gerrit_stream_core::{Event, RawEvent, event::DISCRIMINANT_FIELD};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _, ser::Error as _};
use serde_json::{Map, Value};

use crate::{Account, Approval, Change, PatchSet, RefUpdate, lenient};

const CREATED_ON_FIELD: &str = "eventCreatedOn";

/// Payload of a known event kind.
///
/// Kinds this crate does not model decode to [`EventBody::Unrecognized`]
/// instead of failing, so a newer server never breaks the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventBody {
    #[serde(rename_all = "camelCase")]
    AssigneeChanged {
        change: Change,
        changer: Option<Account>,
        old_assignee: Option<Account>,
    },
    #[serde(rename_all = "camelCase")]
    ChangeAbandoned {
        change: Change,
        patch_set: Option<PatchSet>,
        abandoner: Option<Account>,
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ChangeDeleted {
        change: Change,
        deleter: Option<Account>,
    },
    #[serde(rename_all = "camelCase")]
    ChangeMerged {
        change: Change,
        patch_set: Option<PatchSet>,
        submitter: Option<Account>,
        new_rev: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ChangeRestored {
        change: Change,
        patch_set: Option<PatchSet>,
        restorer: Option<Account>,
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    CommentAdded {
        change: Change,
        patch_set: Option<PatchSet>,
        author: Option<Account>,
        #[serde(default)]
        approvals: Vec<Approval>,
        comment: Option<String>,
    },
    /// The server dropped events for this client because it fell behind.
    DroppedOutput,
    #[serde(rename_all = "camelCase")]
    HashtagsChanged {
        change: Change,
        editor: Option<Account>,
        #[serde(default)]
        added: Vec<String>,
        #[serde(default)]
        removed: Vec<String>,
        #[serde(default)]
        hashtags: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    PatchsetCreated {
        change: Change,
        patch_set: PatchSet,
        uploader: Option<Account>,
    },
    #[serde(rename_all = "camelCase")]
    PrivateStateChanged {
        change: Change,
        patch_set: Option<PatchSet>,
        changer: Option<Account>,
    },
    #[serde(rename_all = "camelCase")]
    ProjectCreated {
        project_name: String,
        project_head: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    RefUpdated {
        submitter: Option<Account>,
        ref_update: RefUpdate,
    },
    #[serde(rename_all = "camelCase")]
    ReviewerAdded {
        change: Change,
        patch_set: Option<PatchSet>,
        reviewer: Account,
        adder: Option<Account>,
    },
    #[serde(rename_all = "camelCase")]
    ReviewerDeleted {
        change: Change,
        patch_set: Option<PatchSet>,
        reviewer: Account,
        remover: Option<Account>,
        #[serde(default)]
        approvals: Vec<Approval>,
        comment: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TopicChanged {
        change: Change,
        changer: Option<Account>,
        old_topic: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    VoteDeleted {
        change: Change,
        patch_set: Option<PatchSet>,
        reviewer: Option<Account>,
        remover: Option<Account>,
        #[serde(default)]
        approvals: Vec<Approval>,
        comment: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    WipStateChanged {
        change: Change,
        patch_set: Option<PatchSet>,
        changer: Option<Account>,
    },
    #[serde(skip)]
    Unrecognized(RawEvent),
}

impl EventBody {
    /// Kinds decoded into a typed variant.
    pub const KNOWN_KINDS: &'static [&'static str] = &[
        "assignee-changed",
        "change-abandoned",
        "change-deleted",
        "change-merged",
        "change-restored",
        "comment-added",
        "dropped-output",
        "hashtags-changed",
        "patchset-created",
        "private-state-changed",
        "project-created",
        "ref-updated",
        "reviewer-added",
        "reviewer-deleted",
        "topic-changed",
        "vote-deleted",
        "wip-state-changed",
    ];

    /// The change this event is about, if any.
    #[must_use]
    pub const fn change(&self) -> Option<&Change> {
        match self {
            Self::AssigneeChanged { change, .. }
            | Self::ChangeAbandoned { change, .. }
            | Self::ChangeDeleted { change, .. }
            | Self::ChangeMerged { change, .. }
            | Self::ChangeRestored { change, .. }
            | Self::CommentAdded { change, .. }
            | Self::HashtagsChanged { change, .. }
            | Self::PatchsetCreated { change, .. }
            | Self::PrivateStateChanged { change, .. }
            | Self::ReviewerAdded { change, .. }
            | Self::ReviewerDeleted { change, .. }
            | Self::TopicChanged { change, .. }
            | Self::VoteDeleted { change, .. }
            | Self::WipStateChanged { change, .. } => Some(change),
            Self::DroppedOutput
            | Self::ProjectCreated { .. }
            | Self::RefUpdated { .. }
            | Self::Unrecognized(_) => None,
        }
    }
}

/// One record from `gerrit stream-events`.
#[derive(Debug, Clone, PartialEq)]
pub struct GerritEvent {
    kind: String,
    created_on: Option<i64>,
    body: EventBody,
}

impl GerritEvent {
    /// Seconds since the epoch at which the server created the event.
    #[must_use]
    pub const fn created_on(&self) -> Option<i64> {
        self.created_on
    }

    #[must_use]
    pub const fn body(&self) -> &EventBody {
        &self.body
    }

    #[must_use]
    pub fn into_body(self) -> EventBody {
        self.body
    }

    /// Project the event belongs to, wherever the kind keeps it.
    #[must_use]
    pub fn project(&self) -> Option<&str> {
        match &self.body {
            EventBody::ProjectCreated { project_name, .. } => Some(project_name.as_str()),
            EventBody::RefUpdated { ref_update, .. } => Some(ref_update.project.as_str()),
            EventBody::Unrecognized(raw) => raw
                .get("project")
                .and_then(Value::as_str)
                .or_else(|| raw.get("projectName").and_then(Value::as_str)),
            body => body.change().and_then(|c| c.project.as_deref()),
        }
    }
}

impl Event for GerritEvent {
    fn kind(&self) -> &str {
        &self.kind
    }
}

impl<'de> Deserialize<'de> for GerritEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawEvent::deserialize(deserializer)?;
        let kind = raw.kind().to_owned();
        let created_on = match raw.get(CREATED_ON_FIELD) {
            Some(value) => lenient::number(value).map_err(D::Error::custom)?,
            None => None,
        };

        let body = if EventBody::KNOWN_KINDS.contains(&kind.as_str()) {
            EventBody::deserialize(Value::Object(raw.into_payload()))
                .map_err(|e| D::Error::custom(format!("invalid {kind} event: {e}")))?
        } else {
            EventBody::Unrecognized(raw)
        };

        Ok(Self {
            kind,
            created_on,
            body,
        })
    }
}

impl Serialize for GerritEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut object = match &self.body {
            EventBody::Unrecognized(raw) => raw.payload().clone(),
            body => match serde_json::to_value(body).map_err(S::Error::custom)? {
                Value::Object(object) => object,
                other => {
                    let mut object = Map::new();
                    object.insert("body".into(), other);
                    object
                }
            },
        };
        object.insert(DISCRIMINANT_FIELD.into(), Value::String(self.kind.clone()));
        if let Some(created_on) = self.created_on {
            object.insert(CREATED_ON_FIELD.into(), created_on.into());
        }
        object.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use gerrit_stream_core::StreamDecoder;

    use super::*;

    const PATCHSET_CREATED: &str = r#"{"uploader":{"name":"Jane Doe","email":"jane@example.com","username":"jdoe"},"patchSet":{"number":2,"revision":"8b2c","parents":["d1f0"],"ref":"refs/changes/45/12345/2","uploader":{"username":"jdoe"},"createdOn":1700000000,"author":{"username":"jdoe"},"kind":"REWORK","sizeInsertions":10,"sizeDeletions":-3},"change":{"project":"infra/tools","branch":"main","id":"I0123","number":12345,"subject":"Fix the build","owner":{"username":"jdoe"},"url":"https://review.example.com/c/infra/tools/+/12345","commitMessage":"Fix the build\n","createdOn":1699990000,"status":"NEW"},"project":"infra/tools","refName":"refs/heads/main","changeKey":{"id":"I0123"},"type":"patchset-created","eventCreatedOn":1700000001}"#;

    #[test]
    fn test_patchset_created() {
        let event: GerritEvent = serde_json::from_str(PATCHSET_CREATED).unwrap();
        assert_eq!(event.kind(), "patchset-created");
        assert_eq!(event.created_on(), Some(1_700_000_001));
        assert_eq!(event.project(), Some("infra/tools"));

        let EventBody::PatchsetCreated {
            change,
            patch_set,
            uploader,
        } = event.body()
        else {
            panic!("unexpected body: {:?}", event.body());
        };
        assert_eq!(change.number, Some(12345));
        assert_eq!(patch_set.number, Some(2));
        assert_eq!(patch_set.kind, Some(crate::PatchSetKind::Rework));
        assert_eq!(
            uploader.as_ref().and_then(Account::display_name),
            Some("jdoe")
        );
    }

    #[test]
    fn test_comment_added_with_string_votes() {
        let line = r#"{"type":"comment-added","change":{"project":"p","number":"7"},"patchSet":{"number":"1"},"author":{"username":"ci"},"approvals":[{"type":"Verified","value":"1","oldValue":"0"}],"comment":"Build passed","eventCreatedOn":"1700000002"}"#;
        let event: GerritEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.created_on(), Some(1_700_000_002));
        let EventBody::CommentAdded {
            approvals, comment, ..
        } = event.body()
        else {
            panic!("unexpected body");
        };
        assert_eq!(approvals[0].value, Some(1));
        assert_eq!(comment.as_deref(), Some("Build passed"));
    }

    #[test]
    fn test_ref_updated_and_project_created() {
        let ref_updated: GerritEvent = serde_json::from_str(
            r#"{"type":"ref-updated","submitter":{"username":"jdoe"},"refUpdate":{"oldRev":"0000000000000000000000000000000000000000","newRev":"8b2c","refName":"refs/heads/feature","project":"infra/tools"}}"#,
        )
        .unwrap();
        assert_eq!(ref_updated.project(), Some("infra/tools"));
        assert!(matches!(
            ref_updated.body(),
            EventBody::RefUpdated { ref_update, .. } if ref_update.is_creation()
        ));

        let created: GerritEvent =
            serde_json::from_str(r#"{"type":"project-created","projectName":"new/repo","projectHead":"refs/heads/main"}"#)
                .unwrap();
        assert_eq!(created.project(), Some("new/repo"));
        assert!(created.body().change().is_none());
    }

    #[test]
    fn test_dropped_output() {
        let event: GerritEvent = serde_json::from_str(r#"{"type":"dropped-output"}"#).unwrap();
        assert_eq!(event.body(), &EventBody::DroppedOutput);
    }

    #[test]
    fn test_unknown_kind_is_kept_raw() {
        let event: GerritEvent = serde_json::from_str(
            r#"{"type":"batch-ref-updated","project":"x","refUpdates":[]}"#,
        )
        .unwrap();
        assert_eq!(event.kind(), "batch-ref-updated");
        assert_eq!(event.project(), Some("x"));
        let EventBody::Unrecognized(raw) = event.body() else {
            panic!("expected raw body");
        };
        assert!(raw.get("refUpdates").is_some());
    }

    #[test]
    fn test_known_kind_with_wrong_shape_is_an_error() {
        let err = serde_json::from_str::<GerritEvent>(r#"{"type":"patchset-created","change":"nope"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("invalid patchset-created event"));
        assert!(serde_json::from_str::<GerritEvent>(r#"{"change":{}}"#).is_err());
    }

    #[test]
    fn test_serializes_back_to_stream_shape() {
        let event: GerritEvent = serde_json::from_str(PATCHSET_CREATED).unwrap();
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "patchset-created");
        assert_eq!(value["eventCreatedOn"], 1_700_000_001);
        assert_eq!(value["change"]["number"], 12345);
        assert_eq!(value["patchSet"]["ref"], "refs/changes/45/12345/2");

        let again: GerritEvent = serde_json::from_value(value).unwrap();
        assert_eq!(again, event);
    }

    #[test]
    fn test_decodes_through_stream_decoder() {
        let mut decoder = StreamDecoder::<GerritEvent>::new();
        let stream = format!("{PATCHSET_CREATED}\n{{\"type\":\"dropped-output\"}}\n");
        let (head, tail) = stream.as_bytes().split_at(100);
        decoder.feed(head);
        assert!(decoder.extract_ready().is_empty());
        decoder.feed(tail);
        let kinds: Vec<String> = decoder
            .finish()
            .into_iter()
            .map(|r| r.unwrap().kind().to_owned())
            .collect();
        assert_eq!(kinds, ["patchset-created", "dropped-output"]);
    }
}
