//! Embedded fallback prompts
//!
//! These are compiled into the binary and used when no override template is found.

/// System prompt for a single-task iteration
pub const ITERATION_SYSTEM: &str = r#"You are working on a task iteratively. This is iteration {{iteration}} of at most {{max_iterations}}.

Your task: {{prompt}}

When you have completed the task to your satisfaction, you MUST signal completion by outputting EXACTLY this tag with NO other text inside it:
<promise>COMPLETION_PHRASE</promise>

Replace COMPLETION_PHRASE with exactly this phrase: {{completion_phrase}}

CRITICAL RULES FOR COMPLETION:
- The promise tag must contain ONLY the exact phrase "{{completion_phrase}}" - nothing else
- Do NOT put descriptions, summaries, or explanations inside the promise tag
- WRONG: <promise>I completed the task about {{completion_phrase}}</promise>
- CORRECT: <promise>{{completion_phrase}}</promise>
- Only output the promise tag when you are TRULY done with the task

If the task is not finished yet, end your response with short notes for your next attempt:
<improvements>
- one concrete lesson per line
</improvements>
"#;

/// System prompt for one step of a multi-task iteration
pub const STEP_SYSTEM: &str = r#"You are working on a multi-step task. This is iteration {{iteration}} of at most {{max_iterations}}.

Original task: {{prompt}}

Current step: Task {{step_index}}/{{step_total}}: {{task}}

Focus on completing THIS specific step. Build on any previous work shown below.

When you have completed ALL steps of the original task to your satisfaction, signal completion by outputting EXACTLY this tag:
<promise>{{completion_phrase}}</promise>

CRITICAL: Only output the promise tag when the ENTIRE original task is complete, not just this step. The tag must contain ONLY the exact phrase "{{completion_phrase}}".

If something in this step should be done differently next time, add short notes:
<improvements>
- one concrete lesson per line
</improvements>
"#;

/// User turn shared by single and multi mode
pub const TASK_USER: &str = r#"{{task}}
{{#if progress_summary}}

## Progress so far
{{progress_summary}}
{{/if}}
{{#if history}}

## Recent iterations
{{#each history}}
### Iteration {{this.iteration}}
{{this.output}}

{{/each}}
{{/if}}
{{#if lessons}}

## Lessons from earlier attempts
{{#each lessons}}
- {{this}}
{{/each}}
{{/if}}
{{#if earlier_steps}}

## Earlier steps in this iteration
{{#each earlier_steps}}
{{this}}

{{/each}}
{{/if}}
{{#if continuation}}

[This is iteration {{iteration}}. Review your previous responses above and continue improving.]
{{/if}}
"#;

/// System prompt for the iteration mode decision
pub const MODE_SYSTEM: &str = r#"You decide how the next iteration of an iterative task should run.

Choose "single" when the remaining work is one focused piece of work.
Choose "multi" when the remaining work naturally splits into several ordered steps.

For "single", put a one-sentence description of what this iteration should focus on in single_task_content.
Always give a brief rationale.

Respond by calling the decide_iteration_mode tool."#;

/// User turn for the iteration mode decision
pub const MODE_USER: &str = r#"Task: {{prompt}}

Iteration: {{iteration}}
{{#if progress_summary}}

Progress so far:
{{progress_summary}}
{{/if}}
{{#if last_output}}

Most recent output:
{{last_output}}
{{/if}}
"#;

/// System prompt for task expansion
pub const PLAN_SYSTEM: &str = r#"Break down the user's task into distinct steps.
Output a plan using the create_plan tool.
Each step should be a single, actionable task.
List the steps in the order they should be carried out.
Iteration: {{iteration}}
{{#if progress_summary}}

Progress so far:
{{progress_summary}}

Plan only the work that remains.
{{/if}}
{{#if lessons}}

Lessons from earlier attempts:
{{#each lessons}}
- {{this}}
{{/each}}
{{/if}}
"#;

/// Get an embedded template by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    match name {
        "iteration-system" => Some(ITERATION_SYSTEM),
        "step-system" => Some(STEP_SYSTEM),
        "task-user" => Some(TASK_USER),
        "mode-system" => Some(MODE_SYSTEM),
        "mode-user" => Some(MODE_USER),
        "plan-system" => Some(PLAN_SYSTEM),
        _ => None,
    }
}
