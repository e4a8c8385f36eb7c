//! User-facing suggestions attached to a finished prediction

use medgate_core::{ModelVariant, PredictionResult};

/// Where a risk band sits among a model's bands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Level of `label` within `bands`, which are ordered highest risk first.
    ///
    /// The first band is high and the last is low. Bands between them are
    /// medium, as is a lone band or a label outside `bands`.
    pub fn of(label: &str, bands: &[String]) -> Self {
        let last = bands.len().saturating_sub(1);
        match bands.iter().position(|b| b == label) {
            Some(_) if last == 0 => Self::Medium,
            Some(0) => Self::High,
            Some(rank) if rank == last => Self::Low,
            _ => Self::Medium,
        }
    }
}

/// Suggestion text for `result` produced on the `variant` path by a model
/// with output `classes`
pub fn advice_for(variant: ModelVariant, result: &PredictionResult, classes: &[String]) -> String {
    match variant {
        ModelVariant::Tabular => heart_advice(RiskLevel::of(&result.label, classes)),
        ModelVariant::Image => brain_advice(&result.label, result.subtype.is_some(), result.confidence),
    }
}

pub fn heart_advice(level: RiskLevel) -> String {
    match level {
        RiskLevel::High => "Your risk is estimated as HIGH. This is not a diagnosis, but you should \
                            strongly consider speaking with a cardiologist and getting full medical tests."
            .to_string(),
        RiskLevel::Medium => "Your risk is estimated as MEDIUM. Consider regular check-ups, monitoring \
                              blood pressure and cholesterol, and discussing lifestyle changes with a \
                              healthcare professional."
            .to_string(),
        RiskLevel::Low => "Your risk is estimated as LOW. Maintain a healthy lifestyle, exercise \
                           regularly, and keep up with periodic check-ups."
            .to_string(),
    }
}

pub fn brain_advice(label: &str, is_tumor: bool, confidence: f32) -> String {
    let pct = (confidence * 100.0).round() as u32;

    if !is_tumor {
        return format!(
            "The model's highest confidence class is '{}' with an estimated probability of \
             about {}%. This does not guarantee that no abnormality exists. If you have any \
             symptoms or concerns, please consult a neurologist or radiologist.",
            label, pct
        );
    }

    format!(
        "The model suggests the MRI is most consistent with '{}' with an estimated \
         probability of about {}%. This is NOT a clinical diagnosis. You should promptly \
         consult a qualified neurologist or neurosurgeon, and have this MRI evaluated by a \
         radiologist for a professional interpretation.",
        label, pct
    )
}
