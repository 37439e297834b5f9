use conductor_core::AgentDescriptor;
use std::fmt::Write;

/// One subtask outcome as shown to the synthesizing agent.
#[derive(Debug, Clone)]
pub struct SynthesisSection {
    pub subtask_id: String,
    pub description: String,
    pub agent_id: String,
    pub content: String,
}

/// Prompt asking the coordinator to break `task` into subtasks for `agents`.
pub fn analysis_prompt(task: &str, agents: &[AgentDescriptor]) -> String {
    let mut prompt = String::from(
        "You are coordinating a team of specialist agents. Break the task below into \
         the smallest set of independent subtasks, assign each to the best agent and \
         state dependencies between subtasks explicitly.\n\nAvailable agents:\n",
    );
    for agent in agents {
        let caps = agent
            .capabilities
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(prompt, "- {} (id: {}): {}", agent.name, agent.id, caps);
    }
    let _ = write!(
        prompt,
        "\nTask:\n{task}\n\n\
         Reply with JSON only, in this shape:\n\
         {{\"subtasks\": [{{\"id\": \"1\", \"description\": \"...\", \"agent\": \"<agent name>\", \
         \"capabilities\": [\"webSearch\"], \"dependencies\": [], \"parallel\": true}}]}}\n\
         Use \"parallel\": false for subtasks that must not run alongside others."
    );
    prompt
}

/// Prompt asking the coordinator to merge subtask results into one answer.
pub fn synthesis_prompt(
    task: &str,
    sections: &[SynthesisSection],
    failures: &[(String, String)],
) -> String {
    let mut prompt = format!(
        "Combine the results of the subtasks below into a single, coherent answer to the \
         original task. Do not mention the subtasks themselves.\n\nOriginal task:\n{task}\n"
    );
    for section in sections {
        let _ = write!(
            prompt,
            "\n## {} ({})\nBy: {}\n{}\n",
            section.subtask_id, section.description, section.agent_id, section.content
        );
    }
    if !failures.is_empty() {
        prompt.push_str("\nThese subtasks failed; work around the missing information:\n");
        for (id, error) in failures {
            let _ = writeln!(prompt, "- {id}: {error}");
        }
    }
    prompt
}
