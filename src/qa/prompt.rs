/// The fixed questions asked about every caption, in answer order.
pub const QUESTIONS: [&str; 5] = [
    "Q1: What imaging modality is represented in this image?",
    "Q2: What body region or anatomical area does this image depict?",
    "Q3: Are there any abnormalities identified in this image?",
    "Q4: Does this image appear normal, or does it show any irregularities?",
    "Q5: Does this image contain any label or index that is significant or noteworthy?",
];

pub const SYSTEM_PROMPT: &str =
    "You are a medical expert trained to interpret medical image captions.";

/// Build the user message for one caption.
pub fn user_prompt(caption: &str) -> String {
    format!(
        "For the provided caption, answer the following questions strictly based on the caption:\n\
         Caption: {}\n\
         {}\n\
         Provide concise answers for each question. \
         For each answer, start with 'A1: ' for answer 1 and so on.",
        caption,
        QUESTIONS.join("\n")
    )
}

/// Split a completion into answer lines, dropping blank lines.
pub fn split_answers(content: &str) -> Vec<String> {
    content
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_prompt_contains_caption_and_questions() {
        let prompt = user_prompt("Apical four-chamber view.");
        assert!(prompt.contains("Caption: Apical four-chamber view."));
        for question in QUESTIONS {
            assert!(prompt.contains(question));
        }
        assert!(prompt.contains("\nProvide concise answers for each question. For each answer"));
        assert!(prompt.ends_with("start with 'A1: ' for answer 1 and so on."));
    }

    #[test]
    fn test_split_answers_drops_blank_lines() {
        let answers = split_answers("\nA1: Ultrasound\n\n  A2: Heart  \nA3: None\n");
        assert_eq!(answers, vec!["A1: Ultrasound", "A2: Heart", "A3: None"]);
    }

    #[test]
    fn test_split_answers_empty() {
        assert!(split_answers("   \n ").is_empty());
    }
}
