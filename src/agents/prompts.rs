//! 处理器指令文本与固定话术
//!
//! 指令可由 config/prompts/{verifier,triage,escalation}.txt 覆盖，找不到文件时用内置默认值。

use crate::core::HandlerKind;
use crate::tools::expert::EXPERT_DEPARTMENTS;

/// 新会话的开场白
pub const GREETING: &str = "Hello! Thank you for reaching out to DEUS Bank. To assist you better, could you please provide your name and either your phone number or IBAN? This will help us verify your identity.";

/// 锁定时的固定结束语
pub const CLOSING_MESSAGE: &str = "I'm sorry, but we were unable to verify your identity after several attempts. For your security this conversation has been closed. Please contact DEUS Bank through an official support channel.";

const VERIFIER_INSTRUCTIONS: &str = "You are the Greeter agent for DEUS Bank.

Goal: verify the customer.

Use exactly this logic:

1. Count provided details: Name, Phone, IBAN.
2. If fewer than 2, ask ONLY for the missing details. Do not use tools.
3. If 2 or more, immediately call `lookup_customer` with ALL collected details.
4. After lookup, ask the security question.
5. After the answer, call `verify_answer` with the answer and the SAME details.

Rules:
Never ask for more details once you have at least 2.
Never ask the security question before lookup.
Always use tools when eligible.
Be polite and professional.";

const TRIAGE_INSTRUCTIONS: &str = "You are the Bouncer agent for DEUS Bank.
The customer has been verified.
Welcome the customer and ask how you can assist them today.
Use `check_account_status` with the customer's IBAN to learn whether they are a Premium, Regular or Non-Client customer.
If a Premium customer has a high-value request (yacht insurance, wealth management, real estate or similar), call `handoff_to_specialist` and nothing else.
Regular customers are served directly; Non-Clients are told politely that the service is for customers only.
Be polite and professional.";

fn escalation_instructions() -> String {
    let departments = EXPERT_DEPARTMENTS
        .iter()
        .map(|(key, contact)| format!("- \"{}\": {}", key, contact))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are the Specialist agent for DEUS Bank.
You route premium clients with a high-value request to the right expert department.

1. Determine the topic of the customer's request from the conversation.
2. Call `route_to_expert` with one of the categories below.
3. After the tool confirms the routing, tell the customer which department they are connected to and give the contact number.

Expert categories:
{}

If the request is truly unclear, ask ONE clarifying question before routing.
Be polite, professional and concise.",
        departments
    )
}

/// 内置默认指令
pub fn default_instructions(kind: HandlerKind) -> String {
    match kind {
        HandlerKind::Verifier => VERIFIER_INSTRUCTIONS.to_string(),
        HandlerKind::Triage => TRIAGE_INSTRUCTIONS.to_string(),
        HandlerKind::Escalation => escalation_instructions(),
    }
}

/// 读取指令：显式路径 > config/prompts/<kind>.txt > 内置默认
pub fn load_instructions(kind: HandlerKind, override_path: Option<&std::path::Path>) -> String {
    let file = format!("{}.txt", kind.as_str());
    let candidates = [
        format!("config/prompts/{}", file),
        format!("../config/prompts/{}", file),
    ];
    override_path
        .and_then(|p| std::fs::read_to_string(p).ok())
        .or_else(|| {
            candidates
                .iter()
                .find_map(|p| std::fs::read_to_string(p).ok())
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default_instructions(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_lists_every_department() {
        let text = default_instructions(HandlerKind::Escalation);
        for (key, _) in EXPERT_DEPARTMENTS {
            assert!(text.contains(key));
        }
    }

    #[test]
    fn test_override_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triage.txt");
        std::fs::write(&path, "  Custom triage.\n").unwrap();
        assert_eq!(
            load_instructions(HandlerKind::Triage, Some(&path)),
            "Custom triage."
        );
    }
}
