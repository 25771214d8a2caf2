use crate::media::MediaKind;

fn subject(kind: MediaKind, image_count: usize) -> String {
    match kind {
        MediaKind::Image => "this photo".to_string(),
        MediaKind::Video => format!("these {image_count} frames taken in order from one short video"),
    }
}

pub fn detection_prompt(kind: MediaKind, image_count: usize) -> String {
    format!(
        "Look at {}. Is a pet or other animal clearly visible?\n\
         Answer only with the JSON described by the schema:\n\
         - pet_detected: true only if an animal is clearly visible\n\
         - species: the animal's species in one word, if any\n\
         - message: if no animal is visible, a short friendly sentence telling the owner what went wrong",
        subject(kind, image_count)
    )
}

pub fn identity_prompt(kind: MediaKind, image_count: usize, pet_name: &str, pet_description: &str) -> String {
    format!(
        "The owner says {} shows their pet {pet_name}, who is {pet_description}.\n\
         Does the animal visible match that description (species first, then breed, size and coloring)?\n\
         Be lenient with breed and age; only report a mismatch when it is clearly a different animal.\n\
         Answer with the JSON described by the schema:\n\
         - matches: true or false\n\
         - detected_description: a short description of the animal you see\n\
         - reason: one sentence explaining your answer",
        subject(kind, image_count)
    )
}

pub fn analysis_prompt(kind: MediaKind, image_count: usize, pet: Option<(&str, &str)>) -> String {
    let about = match pet {
        Some((name, description)) => format!("The animal is {name}, {description}.\n"),
        None => String::new(),
    };
    format!(
        "You are an expert in animal behavior. Analyze the body language, posture, \
         facial expression and surroundings of the animal in {}.\n\
         {about}\
         Return the JSON described by the schema:\n\
         - emotion_detected: the single dominant emotion (e.g. Happy, Anxious, Playful, Relaxed, Fearful, Curious)\n\
         - confidence_level: how sure you are, from 0 to 100\n\
         - behavior_summary: one or two sentences an owner can read at a glance\n\
         - detailed_analysis: a paragraph walking through the cues you observed\n\
         - possible_reasons: likely reasons for this state, most likely first\n\
         - recommendations: practical next steps for the owner, most important first\n\
         If you notice signs of pain, illness or distress, say so in recommendations and suggest a vet visit.",
        subject(kind, image_count)
    )
}
