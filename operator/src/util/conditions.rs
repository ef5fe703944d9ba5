use ambient_code_types::Condition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

/// Upserts `condition` into `conditions` by `type_`, per spec.md §4.1:
/// - if `status` changed relative to the existing entry, `lastTransitionTime`
///   is set to `now`; otherwise the existing transition time is preserved.
/// - an empty `reason`/`message` on the incoming condition does not
///   overwrite an existing non-empty value.
pub fn upsert(conditions: &mut Vec<Condition>, mut condition: Condition, now: Time) {
    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.type_ == condition.type_)
    {
        if existing.status == condition.status {
            condition.last_transition_time = existing.last_transition_time.clone();
        } else {
            condition.last_transition_time = now;
        }
        if condition.reason.is_empty() {
            condition.reason = existing.reason.clone();
        }
        if condition.message.is_empty() {
            condition.message = existing.message.clone();
        }
        *existing = condition;
    } else {
        condition.last_transition_time = now;
        conditions.push(condition);
    }
}

/// Builds a condition with the given fields, suitable for passing to
/// [`upsert`]. `observed_generation` should be the CR's `metadata.generation`
/// at the time of the write, per I3.
pub fn make(
    type_: &str,
    status: bool,
    reason: &str,
    message: impl Into<String>,
    observed_generation: i64,
) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: if status {
            "True".to_string()
        } else {
            "False".to_string()
        },
        reason: reason.to_string(),
        message: message.into(),
        observed_generation: Some(observed_generation),
        last_transition_time: Time(chrono::Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: i64) -> Time {
        Time(chrono::DateTime::from_timestamp(secs, 0).unwrap())
    }

    #[test]
    fn status_change_bumps_transition_time() {
        let mut conditions = vec![];
        upsert(
            &mut conditions,
            make("Ready", false, "Init", "starting up", 1),
            t(100),
        );
        upsert(&mut conditions, make("Ready", true, "", "", 1), t(200));
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, "True");
        assert_eq!(conditions[0].last_transition_time, t(200));
        // empty reason/message on the second upsert preserved the first's.
        assert_eq!(conditions[0].reason, "Init");
        assert_eq!(conditions[0].message, "starting up");
    }

    #[test]
    fn unchanged_status_preserves_transition_time() {
        let mut conditions = vec![];
        upsert(
            &mut conditions,
            make("Ready", true, "AllGood", "ready", 1),
            t(100),
        );
        upsert(
            &mut conditions,
            make("Ready", true, "StillGood", "still ready", 1),
            t(200),
        );
        assert_eq!(conditions[0].last_transition_time, t(100));
        assert_eq!(conditions[0].reason, "StillGood");
    }

    #[test]
    fn distinct_types_coexist() {
        let mut conditions = vec![];
        upsert(&mut conditions, make("Ready", true, "", "", 1), t(1));
        upsert(
            &mut conditions,
            make("PodCreated", true, "", "", 1),
            t(1),
        );
        assert_eq!(conditions.len(), 2);
    }
}
