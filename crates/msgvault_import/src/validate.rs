use msgvault::{Error, ImportRecord, Result};

/// Validates one import record per spec §4.9 step 1: non-empty id/stream/
/// type, non-negative positions. `time` needs no check here — it is already
/// a parsed `DateTime<Utc>` by the time it reaches an [`ImportRecord`]; the
/// boundary that deserializes raw NDJSON is responsible for rejecting
/// unparseable timestamps before constructing one.
pub fn validate(record: &ImportRecord) -> Result<()> {
    if record.id.is_nil() {
        return Err(Error::InvalidJson("import record id must not be nil".into()));
    }
    if record.stream_name.trim().is_empty() {
        return Err(Error::InvalidJson("import record stream must not be empty".into()));
    }
    if record.msg_type.trim().is_empty() {
        return Err(Error::InvalidJson("import record type must not be empty".into()));
    }
    if record.position < 0 {
        return Err(Error::InvalidJson(format!(
            "import record position must be >= 0, got {}",
            record.position
        )));
    }
    if record.global_position < 0 {
        return Err(Error::InvalidJson(format!(
            "import record global_position must be >= 0, got {}",
            record.global_position
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn valid_record() -> ImportRecord {
        ImportRecord {
            id: Uuid::new_v4(),
            stream_name: "acct-1".into(),
            msg_type: "Deposited".into(),
            position: 0,
            global_position: 47,
            data: serde_json::json!({}),
            metadata: None,
            time: Utc::now(),
        }
    }

    #[test]
    fn accepts_a_well_formed_record() {
        assert!(validate(&valid_record()).is_ok());
    }

    #[test]
    fn rejects_nil_id() {
        let mut record = valid_record();
        record.id = Uuid::nil();
        assert!(validate(&record).is_err());
    }

    #[test]
    fn rejects_empty_stream() {
        let mut record = valid_record();
        record.stream_name = "  ".into();
        assert!(validate(&record).is_err());
    }

    #[test]
    fn rejects_empty_type() {
        let mut record = valid_record();
        record.msg_type = "".into();
        assert!(validate(&record).is_err());
    }

    #[test]
    fn rejects_negative_position() {
        let mut record = valid_record();
        record.position = -1;
        assert!(validate(&record).is_err());
    }

    #[test]
    fn rejects_negative_global_position() {
        let mut record = valid_record();
        record.global_position = -1;
        assert!(validate(&record).is_err());
    }
}
