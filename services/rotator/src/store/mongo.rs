//! MongoDB record store.
//!
//! Candidates are the contacts who checked in today (UTC). Each contact's
//! most recent attendance supplies the check-in time, which is also the
//! rotation ordering key, and their surveys are folded into display details.
//! The active marker lives in a single `rotation_state` document.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, Bson, DateTime as BsonDateTime, Document},
    error::{ErrorKind, WriteFailure},
    Client, Collection, Database,
};
use rush_rotation::{ActiveMarker, BidTally, Candidate, CandidateDetails, CandidateId};
use tracing::{debug, info, instrument, warn};

use super::{RecordStore, StoreError, StoreResult};

const ATTENDANCES: &str = "attendances";
const CONTACTS: &str = "contacts";
const SURVEYS: &str = "surveys";
const ROTATION_STATE: &str = "rotation_state";

/// `_id` of the single active-marker document.
const ACTIVE_DOC_ID: &str = "active";

const DUPLICATE_KEY: i32 = 11000;

// Survey bid statuses.
const BID_GREEN: &str = "Green";
const BID_RED: &str = "Red";
const BID_PRO: &str = "Pro/Put Up";
const BID_CON: &str = "Con";

/// MongoDB-backed record store.
#[derive(Debug, Clone)]
pub struct MongoRecordStore {
    db: Database,
}

impl MongoRecordStore {
    /// Connect and verify the deployment answers a ping.
    pub async fn connect(uri: &str, db_name: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri).await.map_err(unavailable)?;
        let db = client.database(db_name);
        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(unavailable)?;

        info!(db_name, "MongoDB connection established");
        Ok(Self::new(db))
    }

    /// Wrap an existing database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }

    /// Distinct contact IDs with an attendance inside `[start, end)`.
    async fn contact_ids_checked_in(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<ObjectId>> {
        let filter = doc! {
            "checkInDate": {
                "$gte": to_bson_datetime(start),
                "$lt": to_bson_datetime(end),
            }
        };

        let raw = self
            .collection(ATTENDANCES)
            .distinct("contactId", filter)
            .await
            .map_err(unavailable)?;

        Ok(raw.iter().filter_map(as_object_id).collect())
    }

    /// Load documents by `_id`, keyed by that ID.
    async fn find_by_ids(
        &self,
        collection: &str,
        ids: &BTreeSet<ObjectId>,
    ) -> StoreResult<HashMap<ObjectId, Document>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<Bson> = ids.iter().copied().map(Bson::ObjectId).collect();
        let docs: Vec<Document> = self
            .collection(collection)
            .find(doc! { "_id": { "$in": ids } })
            .await
            .map_err(unavailable)?
            .try_collect()
            .await
            .map_err(unavailable)?;

        Ok(docs
            .into_iter()
            .filter_map(|d| d.get_object_id("_id").ok().map(|id| (id, d)))
            .collect())
    }
}

#[async_trait]
impl RecordStore for MongoRecordStore {
    #[instrument(skip(self))]
    async fn fetch_candidates(&self) -> StoreResult<Vec<Candidate>> {
        let (start, end) = utc_day_bounds(Utc::now());

        let contact_ids: BTreeSet<ObjectId> = self
            .contact_ids_checked_in(start, end)
            .await?
            .into_iter()
            .collect();
        let contacts = self.find_by_ids(CONTACTS, &contact_ids).await?;

        let attendance_ids = referenced_ids(contacts.values(), "attendance");
        let survey_ids = referenced_ids(contacts.values(), "surveyInfo");
        let attendances = self.find_by_ids(ATTENDANCES, &attendance_ids).await?;
        let surveys = self.find_by_ids(SURVEYS, &survey_ids).await?;

        let candidates =
            candidates_from_contacts(contacts.values(), &attendances, &surveys, start, end);

        info!(
            candidate_count = candidates.len(),
            "Fetched candidates checked in today"
        );
        Ok(candidates)
    }

    async fn fetch_active(&self) -> StoreResult<Option<ActiveMarker>> {
        let doc = self
            .collection(ROTATION_STATE)
            .find_one(doc! { "_id": ACTIVE_DOC_ID })
            .await
            .map_err(unavailable)?;

        doc.map(|d| marker_from_document(&d)).transpose()
    }

    #[instrument(skip(self, candidate), fields(candidate_id = %candidate.id))]
    async fn set_active(
        &self,
        candidate: &Candidate,
        expected_version: u64,
    ) -> StoreResult<ActiveMarker> {
        let marker = ActiveMarker {
            candidate_id: candidate.id.clone(),
            activated_at: Utc::now(),
            version: expected_version + 1,
        };

        let filter = doc! { "_id": ACTIVE_DOC_ID, "version": version_to_bson(expected_version)? };
        let update = doc! {
            "$set": {
                "candidateId": marker.candidate_id.as_str(),
                "activatedAt": to_bson_datetime(marker.activated_at),
                "version": version_to_bson(marker.version)?,
            }
        };

        let result = self
            .collection(ROTATION_STATE)
            .update_one(filter, update)
            .upsert(true)
            .await;

        match result {
            Ok(r) if r.matched_count == 1 || r.upserted_id.is_some() => Ok(marker),
            Ok(_) => Err(StoreError::Conflict {
                expected: expected_version,
                actual: None,
            }),
            // The upsert tried to insert a second "active" document because
            // the stored version differs from ours.
            Err(e) if is_duplicate_key(&e) => Err(StoreError::Conflict {
                expected: expected_version,
                actual: None,
            }),
            Err(e) => Err(unavailable(e)),
        }
    }
}

fn unavailable(err: mongodb::error::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY
    )
}

fn to_bson_datetime(ts: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(ts.timestamp_millis())
}

fn from_bson_datetime(ts: &BsonDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ts.timestamp_millis())
}

fn version_to_bson(version: u64) -> StoreResult<i64> {
    i64::try_from(version)
        .map_err(|_| StoreError::Malformed(format!("marker version {version} out of range")))
}

/// Start of the UTC day containing `now`, and the start of the next day.
fn utc_day_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(now);
    (midnight, midnight + Duration::days(1))
}

/// Accept ObjectIds stored natively or as hex strings.
fn as_object_id(value: &Bson) -> Option<ObjectId> {
    match value {
        Bson::ObjectId(oid) => Some(*oid),
        Bson::String(s) => ObjectId::parse_str(s).ok(),
        _ => None,
    }
}

/// Collect the IDs referenced by an array field across documents.
fn referenced_ids<'a>(docs: impl Iterator<Item = &'a Document>, field: &str) -> BTreeSet<ObjectId> {
    docs.filter_map(|d| d.get_array(field).ok())
        .flatten()
        .filter_map(as_object_id)
        .collect()
}

fn string_list(doc: &Document, field: &str) -> Vec<String> {
    doc.get_array(field)
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Numeric BSON (including Decimal128) as `f64`.
fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(v) => Some(*v),
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Decimal128(d) => d.to_string().parse().ok(),
        Bson::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn check_in_of(attendance: &Document) -> Option<DateTime<Utc>> {
    attendance
        .get_datetime("checkInDate")
        .ok()
        .and_then(from_bson_datetime)
}

/// The attendance with the latest check-in.
fn latest_attendance<'a>(attendances: impl Iterator<Item = &'a Document>) -> Option<&'a Document> {
    attendances
        .filter_map(|a| check_in_of(a).map(|ts| (ts, a)))
        .max_by_key(|(ts, _)| *ts)
        .map(|(_, a)| a)
}

/// Aggregated survey results for one contact.
#[derive(Debug, Default, PartialEq)]
struct SurveySummary {
    mean_fit_rating: Option<f64>,
    bids: BidTally,
    brother_recs: Vec<String>,
    interests: Vec<String>,
}

/// Fold surveys into fit-rating mean, bid tallies and de-duplicated lists.
///
/// Names and interests are compared case-insensitively. Surveys without a
/// readable fit rating still count toward tallies and lists.
fn summarize_surveys<'a>(surveys: impl Iterator<Item = &'a Document>) -> SurveySummary {
    let mut bids = BidTally::default();
    let mut rating_sum = 0.0;
    let mut rated = 0u32;
    let mut recs = BTreeSet::new();
    let mut interests = BTreeSet::new();

    for survey in surveys {
        match survey.get("fitRating").and_then(as_f64) {
            Some(rating) => {
                rating_sum += rating;
                rated += 1;
            }
            None => warn!(survey_id = ?survey.get("_id"), "Survey has no usable fitRating"),
        }

        match survey.get_str("bidStatus").unwrap_or_default() {
            BID_GREEN => bids.greens += 1,
            BID_RED => bids.reds += 1,
            BID_PRO => bids.pro += 1,
            BID_CON => bids.con += 1,
            _ => {}
        }

        recs.extend(string_list(survey, "brotherRecs").iter().map(|s| s.to_lowercase()));
        interests.extend(string_list(survey, "interestTags").iter().map(|s| s.to_lowercase()));
    }

    SurveySummary {
        mean_fit_rating: (rated > 0).then(|| rating_sum / f64::from(rated)),
        bids,
        brother_recs: recs.into_iter().collect(),
        interests: interests.into_iter().collect(),
    }
}

/// Build a candidate from a contact, or `None` if their latest attendance is
/// outside `[start, end)`.
fn candidate_from_contact(
    contact: &Document,
    attendances: &HashMap<ObjectId, Document>,
    surveys: &HashMap<ObjectId, Document>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> StoreResult<Option<Candidate>> {
    let contact_id = contact
        .get_object_id("_id")
        .map_err(|e| StoreError::Malformed(format!("contact _id: {e}")))?;
    let name = contact
        .get_str("name")
        .map_err(|e| StoreError::Malformed(format!("contact {contact_id} name: {e}")))?;

    let own_attendances = referenced_ids(std::iter::once(contact), "attendance");
    let Some(latest) = latest_attendance(own_attendances.iter().filter_map(|id| attendances.get(id)))
    else {
        return Ok(None);
    };
    let Some(check_in) = check_in_of(latest).filter(|ts| *ts >= start && *ts < end) else {
        return Ok(None);
    };
    let check_out = latest
        .get_datetime("checkOutDate")
        .ok()
        .and_then(from_bson_datetime);

    let own_surveys = referenced_ids(std::iter::once(contact), "surveyInfo");
    let missing = own_surveys.iter().filter(|id| !surveys.contains_key(id)).count();
    if missing > 0 {
        warn!(contact_id = %contact_id, missing, "Contact references unknown surveys");
    }
    let summary = summarize_surveys(own_surveys.iter().filter_map(|id| surveys.get(id)));

    let id = CandidateId::new(contact_id.to_hex())
        .map_err(|e| StoreError::Malformed(e.to_string()))?;

    Ok(Some(
        Candidate::new(id, name, check_in.timestamp_millis()).with_details(CandidateDetails {
            check_in: Some(check_in),
            check_out,
            mean_fit_rating: summary.mean_fit_rating,
            bids: summary.bids,
            brother_recs: summary.brother_recs,
            interests: summary.interests,
        }),
    ))
}

/// Build candidates for every contact that checked in inside `[start, end)`.
///
/// A malformed contact is logged and skipped so the rest still rotate.
fn candidates_from_contacts<'a>(
    contacts: impl Iterator<Item = &'a Document>,
    attendances: &HashMap<ObjectId, Document>,
    surveys: &HashMap<ObjectId, Document>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for contact in contacts {
        match candidate_from_contact(contact, attendances, surveys, start, end) {
            Ok(Some(candidate)) => candidates.push(candidate),
            Ok(None) => debug!(
                contact_id = ?contact.get("_id"),
                "Contact did not check in today; skipping"
            ),
            Err(e) => warn!(
                contact_id = ?contact.get("_id"),
                error = %e,
                "Skipping malformed contact"
            ),
        }
    }
    candidates
}

fn marker_from_document(doc: &Document) -> StoreResult<ActiveMarker> {
    let malformed = |field: &str, e: &dyn std::fmt::Display| {
        StoreError::Malformed(format!("rotation_state.{field}: {e}"))
    };

    let candidate_id = doc
        .get_str("candidateId")
        .map_err(|e| malformed("candidateId", &e))?;
    let candidate_id = CandidateId::new(candidate_id).map_err(|e| malformed("candidateId", &e))?;

    let activated_at = doc
        .get_datetime("activatedAt")
        .map_err(|e| malformed("activatedAt", &e))
        .and_then(|ts| {
            from_bson_datetime(ts).ok_or_else(|| malformed("activatedAt", &"out of range"))
        })?;

    let version = match doc.get("version") {
        Some(Bson::Int64(v)) => u64::try_from(*v).ok(),
        Some(Bson::Int32(v)) => u64::try_from(*v).ok(),
        _ => None,
    }
    .ok_or_else(|| malformed("version", &"missing or negative"))?;

    Ok(ActiveMarker {
        candidate_id,
        activated_at,
        version,
    })
}
