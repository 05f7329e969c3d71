use crate::limits::*;
use crate::model::{Citizen, DAY_MS, Ms, SlotKey};

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_slot(key: &SlotKey) -> Result<(), EngineError> {
    if key.date % DAY_MS != 0 {
        return Err(EngineError::InvalidField("date must be UTC midnight"));
    }
    if !(MIN_VALID_DATE_MS..=MAX_VALID_DATE_MS).contains(&key.date) {
        return Err(EngineError::InvalidField("date out of range"));
    }
    if !(0..DAY_MS).contains(&key.time) {
        return Err(EngineError::InvalidField("time outside the day"));
    }
    Ok(())
}

/// Strip punctuation and require exactly 11 digits. Check digits are
/// not verified here; the issuing registry is the authority on those.
pub(crate) fn normalize_cpf(raw: &str) -> Result<String, EngineError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 11 {
        return Err(EngineError::InvalidField("cpf must have 11 digits"));
    }
    if raw.chars().any(|c| !c.is_ascii_digit() && c != '.' && c != '-' && c != ' ') {
        return Err(EngineError::InvalidField("cpf has invalid characters"));
    }
    Ok(digits)
}

pub(crate) fn validate_citizen(citizen: &Citizen) -> Result<(), EngineError> {
    if citizen.name.trim().is_empty() {
        return Err(EngineError::InvalidField("citizen name is required"));
    }
    if citizen.name.len() > MAX_NAME_LEN {
        return Err(EngineError::InvalidField("citizen name too long"));
    }
    for field in [&citizen.phone, &citizen.email, &citizen.street, &citizen.number, &citizen.district, &citizen.city]
        .into_iter()
        .flatten()
    {
        if field.len() > MAX_CONTACT_LEN {
            return Err(EngineError::InvalidField("contact field too long"));
        }
    }
    Ok(())
}

pub(crate) fn validate_reason(reason: &str) -> Result<(), EngineError> {
    if reason.len() > MAX_REASON_LEN {
        return Err(EngineError::InvalidField("reason too long"));
    }
    Ok(())
}
