//! First messages and system-prompt overrides for the two call flows.
//!
//! The live flow greets the callee and hands the conversation to the
//! agent's configured behavior; the voicemail flow overrides the prompt so
//! the agent delivers one message and then calls `end_voicemail_call`.

/// Opening line for a live conversation.
pub fn live_first_message(name: &str) -> String {
    format!("Hi {name}, this is Casey calling from the clinic. How are you today?")
}

/// System-prompt addition for a live conversation.
pub fn live_prompt() -> String {
    "You are Casey, a warm and professional phone receptionist for the clinic. \
     You are on a live phone call. Keep responses short and conversational. \
     Use the booking tools to check availability and book appointments. \
     When the conversation is finished, call the end_call tool."
        .to_string()
}

/// Opening line when an answering machine picked up.
pub fn voicemail_first_message(name: &str) -> String {
    format!(
        "Hi {name}, this is Casey calling from the clinic. Sorry we missed you! \
         Please call us back at your convenience to confirm your appointment. \
         Thanks, and have a great day!"
    )
}

/// System-prompt override for voicemail delivery.
pub fn voicemail_prompt() -> String {
    "An answering machine picked up this call. Deliver your first message as a \
     single voicemail and do not wait for a reply. Immediately after the \
     message is spoken, call the end_voicemail_call tool to hang up. Do not \
     say anything else."
        .to_string()
}
