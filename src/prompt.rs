/// Prompt for classifying radiology report addenda. The model must answer
/// with a small JSON object so the response can be parsed mechanically.
const ANALYSIS_PROMPT: &str = r#"Analyze this radiology report to identify IMAGING-RELATED addenda.

GOAL: Identify if an addendum contains NEW clinical imaging findings that were MISSED, NOT PREVIOUSLY REPORTED, or represent SIGNIFICANT CORRECTIONS.

ABSOLUTE RULE: if the addendum explicitly mentions "transcription error", "dictation error", "typographical error", or "typo", return "No" and "None" regardless of how significant the content change is. Only genuine overlooked findings count, not typos that were later corrected.

STEP 1 - Find the ADDENDUM section:
- Look for "ADDENDUM", "** ADDENDUM **", "******** ADDENDUM ********"
- If NO addendum section exists, return "No" and "None"

STEP 2 - Classify the addendum. Return "No" and "None" if it is EXCLUSIVELY:
- Rewording or reformatting ("should read", "findings should read")
- Findings already in the original report ("again seen", "as on prior", "previously reported")
- Typo/spelling/transcription/dictation corrections
- Communication only ("discussed with", "communicated to", "relayed to")
- Technique only ("3D/MIP performed", "reformats provided", "reconstructed images")
- Image or series number corrections
- Administrative text ("this is a final report", "report signed by")
- Comparison updates without new findings

Return "Yes" and extract the addendum text if it contains ANY of:
- New findings absent from the original report (fractures, nodules, masses, effusions, "incidental note of", "not mentioned in the original")
- Significant corrections to findings (location, size, or severity changes)
- Reinterpretations ("initially thought to be X, now thought to be Y")
- Diagnostic impressions ("concerning for", "suspicious for", "consistent with")

If the addendum mentions a new finding alongside communication text, extract the finding part.

RADIOLOGY REPORT:
"""
{report_text}
"""

Return valid JSON:
{
  "is_imaging_related": "Yes" or "No",
  "addendum_content": "exact addendum text" or "None"
}"#;

/// Embed the report verbatim into the analysis prompt.
pub fn build_prompt(report_text: &str) -> String {
    ANALYSIS_PROMPT.replace("{report_text}", report_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeds_report_verbatim() {
        let prompt = build_prompt("CT chest: 5mm nodule");
        assert!(prompt.contains("CT chest: 5mm nodule"));
        assert!(!prompt.contains("{report_text}"));
    }

    #[test]
    fn keeps_json_contract() {
        let prompt = build_prompt("x");
        assert!(prompt.contains("is_imaging_related"));
        assert!(prompt.contains("addendum_content"));
    }
}
