//! Platform neutral message formatting

use crate::models::notice::{Notice, TaskStatus};
use crate::models::summary::JobSummary;

/// Prefix a message with a mention of `user`
pub fn format_reply(user: &str, message: &str) -> String {
    format!("<@{}>: {}", user, message)
}

/// Prefix with a mention when the requester is known
pub fn mention(user: Option<&str>, message: &str) -> String {
    match user {
        Some(user) => format_reply(user, message),
        None => message.to_string(),
    }
}

/// Wrap text in a code block
pub fn format_plain_text(message: &str) -> String {
    format!("```\n{}\n```", message.trim_end())
}

pub fn task_line(task: &str, status: TaskStatus) -> String {
    match status {
        TaskStatus::Started => format!("Started {}", task),
        TaskStatus::Succeeded => format!("Succeed {}", task),
        TaskStatus::Failed => format!("Failed {}", task),
    }
}

/// One line per host, as plain text
pub fn summary_lines(summary: &JobSummary) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(revision) = &summary.revision {
        lines.push(format!("Revision: {}", revision));
    }
    let mut request = format!("Sites: {}", summary.sites.join(", "));
    if let Some(branch) = &summary.branch {
        request.push_str(&format!(" | Branch: {}", branch));
    }
    if let Some(user) = &summary.requested_by {
        request.push_str(&format!(" | By User: <@{}>", user));
    }
    lines.push(request);

    for host in &summary.hosts {
        if host.succeeded {
            lines.push(format!(
                "The operation on host {} has been successfully performed.",
                host.host
            ));
        } else {
            lines.push(format!("The operation on host {} has failed.", host.host));
            for error in &host.errors {
                lines.push(format_plain_text(error.trim()));
            }
        }
    }
    lines
}

/// Render a notice as plain text, for adapters without rich formatting
pub fn render_plain(notice: &Notice) -> String {
    match notice {
        Notice::Text { text } => text.clone(),
        Notice::Output { title, output } => format!("{}\n{}", title, format_plain_text(output)),
        Notice::Task { task, status } => task_line(task, *status),
        Notice::Summary { summary } => summary_lines(summary).join("\n"),
    }
}
