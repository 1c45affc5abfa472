use super::gateway::{
    GeneratedMessage, GenerationGateway, GroupingRequest, GroupingResult, Outcome,
};
use crate::config::AgentConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Prompts longer than this are piped to the agent's stdin; a single argv
/// entry over 128 KiB fails to exec on Linux
pub const MAX_ARG_PROMPT: usize = 64 * 1024;

/// Gateway that asks an external agent CLI (e.g. `claude --print`)
pub struct AgentGateway {
    config: AgentConfig,
}

impl AgentGateway {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Run the agent with `prompt` and return its stdout. Cancelling or
    /// timing out kills the child process.
    async fn run(&self, prompt: &str, cancel: &CancellationToken) -> Outcome<String> {
        let invocation = resolve_command(&self.config, prompt);
        let cmd = &invocation.command;
        debug!(command = %cmd, piped = invocation.stdin.is_some(), "starting agent");

        let child = Command::new(cmd)
            .args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match child {
            Ok(child) => child,
            Err(e) => return Outcome::Failed(format!("Failed to start {cmd}: {e}")),
        };

        // Feed stdin while reading output so neither pipe can fill up and stall
        let pipe = child.stdin.take();
        let input = invocation.stdin;
        let feed = async move {
            if let (Some(mut pipe), Some(text)) = (pipe, input) {
                if let Err(e) = pipe.write_all(text.as_bytes()).await {
                    debug!(error = %e, "agent closed stdin early");
                }
            }
        };
        let io = async { tokio::join!(feed, child.wait_with_output()).1 };

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(command = %cmd, "agent cancelled");
                Outcome::Cancelled
            }
            _ = tokio::time::sleep(self.config.timeout()) => {
                warn!(command = %cmd, timeout = self.config.timeout_secs, "agent timed out");
                Outcome::Failed(format!("{cmd} timed out after {}s", self.config.timeout_secs))
            }
            output = io => match output {
                Ok(out) if out.status.success() => {
                    Outcome::Completed(String::from_utf8_lossy(&out.stdout).into_owned())
                }
                Ok(out) => Outcome::Failed(format!(
                    "{cmd} exited with {}: {}",
                    out.status,
                    String::from_utf8_lossy(&out.stderr).trim()
                )),
                Err(e) => Outcome::Failed(format!("{cmd} failed: {e}")),
            },
        }
    }
}

#[async_trait]
impl GenerationGateway for AgentGateway {
    async fn generate_grouping(
        &self,
        request: &GroupingRequest,
        cancel: &CancellationToken,
    ) -> Outcome<GroupingResult> {
        let prompt = match build_grouping_prompt(request) {
            Ok(p) => p,
            Err(e) => return Outcome::Failed(format!("{e:#}")),
        };
        match self.run(&prompt, cancel).await {
            Outcome::Completed(text) => match parse_grouping(&text) {
                Ok(result) => Outcome::Completed(result),
                Err(e) => Outcome::Failed(format!("{e:#}")),
            },
            Outcome::Cancelled => Outcome::Cancelled,
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }

    async fn generate_message(
        &self,
        commit_id: &str,
        diff: &str,
        cancel: &CancellationToken,
    ) -> Outcome<GeneratedMessage> {
        debug!(draft = commit_id, "generating commit message");
        let prompt = build_message_prompt(diff);
        match self.run(&prompt, cancel).await.map(|text| parse_message(&text)) {
            Outcome::Completed(m) if m.summary.is_empty() => {
                Outcome::Failed("Agent returned an empty commit message".to_string())
            }
            other => other,
        }
    }
}

/// How to start the agent for one prompt
#[derive(Debug, PartialEq)]
pub struct AgentInvocation {
    pub command: String,
    pub args: Vec<String>,
    /// Prompt to write to stdin when it is not passed as an argument
    pub stdin: Option<String>,
}

/// Substitute `{prompt}` into the configured arguments. Without a
/// placeholder, or with a prompt over [`MAX_ARG_PROMPT`], the prompt goes to
/// stdin and bare `{prompt}` arguments are dropped.
pub fn resolve_command(config: &AgentConfig, prompt: &str) -> AgentInvocation {
    let placeholder = config.args.iter().any(|a| a.contains("{prompt}"));
    if placeholder && prompt.len() <= MAX_ARG_PROMPT {
        return AgentInvocation {
            command: config.command.clone(),
            args: config
                .args
                .iter()
                .map(|a| a.replace("{prompt}", prompt))
                .collect(),
            stdin: None,
        };
    }
    AgentInvocation {
        command: config.command.clone(),
        args: config
            .args
            .iter()
            .filter(|a| a.as_str() != "{prompt}")
            .map(|a| a.replace("{prompt}", ""))
            .collect(),
        stdin: Some(prompt.to_string()),
    }
}

pub fn build_grouping_prompt(request: &GroupingRequest) -> Result<String> {
    let hunks = serde_json::to_string_pretty(&request.hunks).context("Failed to encode hunks")?;
    let drafts = serde_json::to_string_pretty(&request.existing_drafts)
        .context("Failed to encode drafts")?;

    let mut prompt = String::from(
        "You are organizing uncommitted changes into a sequence of logical, \
         self-contained commits.\n\n\
         Each hunk below has a numeric `index`. Assign every hunk to exactly one \
         commit. Order the commits so each one builds on the previous.\n\n",
    );
    prompt.push_str(&format!("Hunks:\n{hunks}\n\n"));
    prompt.push_str(&format!("Current draft commits:\n{drafts}\n\n"));
    if let Some(instructions) = request.custom_instructions.as_deref().filter(|s| !s.trim().is_empty()) {
        prompt.push_str(&format!("Additional instructions:\n{instructions}\n\n"));
    }
    prompt.push_str(
        "Respond with JSON only, in this shape:\n\
         {\"commits\":[{\"message\":\"<commit message>\",\"explanation\":\"<why these hunks belong together>\",\"hunks\":[{\"hunk\":1}]}]}\n",
    );
    Ok(prompt)
}

pub fn build_message_prompt(diff: &str) -> String {
    format!(
        "Write a commit message for the following diff.\n\
         The first line is a summary of at most 72 characters. If more detail \
         helps, add a blank line followed by a short body.\n\
         Respond with the commit message only.\n\n{diff}"
    )
}

/// Parse the agent's grouping answer. Tolerates prose or code fences around
/// the JSON object.
pub fn parse_grouping(text: &str) -> Result<GroupingResult> {
    let json = extract_json_object(text).context("Agent response contained no JSON object")?;
    serde_json::from_str(json).context("Agent response is not a valid grouping")
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Split a plain-text answer into summary and body. A JSON
/// `{"summary", "body"}` answer is accepted as well.
pub fn parse_message(text: &str) -> GeneratedMessage {
    if let Some(parsed) = extract_json_object(text)
        .and_then(|json| serde_json::from_str::<GeneratedMessage>(json).ok())
    {
        return parsed;
    }

    let cleaned: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim_start().starts_with("```"))
        .collect();
    let mut lines = cleaned.into_iter().skip_while(|l| l.trim().is_empty());
    let summary = lines.next().unwrap_or_default().trim().to_string();
    let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();

    GeneratedMessage {
        summary,
        body: (!body.is_empty()).then_some(body),
    }
}
