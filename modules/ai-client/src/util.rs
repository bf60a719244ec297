/// Strip markdown code fences (```` ```json ```` / ```` ``` ````) from a model response.
pub fn strip_code_blocks(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", ...) up to the end of the fence line.
    let rest = match rest.find('\n') {
        Some(idx) if rest[..idx].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
            &rest[idx + 1..]
        }
        _ => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    rest.trim_end().trim_end_matches("```").trim()
}
