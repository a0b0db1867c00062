// compile-service-rs/src/log_interpreter.rs
// Heuristic classification of pdflatex log output.
//
// This is deliberately not a parser: it picks the first line starting with
// the error marker and maps it onto a small set of canned messages via
// priority-ordered substring checks. First match wins.

/// First character of an error line in a (pdf)latex log.
const ERROR_MARKER: char = '!';

/// Trailing non-empty lines used as the excerpt when no error line exists.
const FALLBACK_EXCERPT_LINES: usize = 5;

/// Lines of context included after the error line.
const CONTEXT_LINES: usize = 2;

pub const MSG_UNDEFINED_COMMAND: &str = "An undefined LaTeX command was used. Check the spelling of your commands and that the packages defining them are loaded.";
pub const MSG_FILE_NOT_FOUND: &str = "A file or package required by the document could not be found. Check every \\input, \\include and \\usepackage target.";
pub const MSG_MISSING_TOKEN: &str = "The document is missing a required token, such as a closing brace, math delimiter or mandatory argument.";
pub const MSG_EMERGENCY_STOP: &str = "The compiler hit an unrecoverable error and stopped. The document likely has a structural problem near the reported line.";
pub const MSG_GENERIC_FAILURE: &str = "Compilation failed without a recognizable error line in the log.";

/// Canned human-readable message plus a short excerpt from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub message: String,
    pub excerpt: String,
}

/// Classify raw compiler log text into a human-readable error.
///
/// Pure function so the heuristic can be tested without spawning the
/// compiler. Multi-error logs are not handled beyond picking the first
/// marked line.
pub fn interpret(log_text: &str) -> ClassifiedError {
    let lines: Vec<&str> = log_text.lines().collect();

    let Some(index) = lines.iter().position(|line| line.starts_with(ERROR_MARKER)) else {
        let mut tail: Vec<&str> = lines
            .iter()
            .rev()
            .map(|line| line.trim_end())
            .filter(|line| !line.is_empty())
            .take(FALLBACK_EXCERPT_LINES)
            .collect();
        tail.reverse();

        return ClassifiedError {
            message: MSG_GENERIC_FAILURE.to_string(),
            excerpt: tail.join("\n"),
        };
    };

    let error_line = lines[index];
    let lowered = error_line.to_ascii_lowercase();

    let message = if lowered.contains("undefined control sequence") {
        MSG_UNDEFINED_COMMAND.to_string()
    } else if lowered.contains("file") && lowered.contains("not found") {
        MSG_FILE_NOT_FOUND.to_string()
    } else if lowered.contains("missing") {
        MSG_MISSING_TOKEN.to_string()
    } else if lowered.contains("emergency stop") {
        MSG_EMERGENCY_STOP.to_string()
    } else {
        let stripped = error_line.trim_start_matches(ERROR_MARKER).trim();
        if stripped.is_empty() {
            MSG_GENERIC_FAILURE.to_string()
        } else {
            stripped.to_string()
        }
    };

    let excerpt = lines[index..]
        .iter()
        .take(CONTEXT_LINES + 1)
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n");

    ClassifiedError { message, excerpt }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_command_is_canned_verbatim() {
        let log = "This is pdfTeX, Version 3.141592653\n\
                   (./main.tex\nLaTeX2e <2023-11-01>\n\
                   ! Undefined control sequence.\n\
                   l.4 \\badmacro\n\
                   The control sequence at the end of the top line\n\
                   (noise continues)";
        let result = interpret(log);
        assert_eq!(result.message, MSG_UNDEFINED_COMMAND);
        assert!(result.excerpt.starts_with("! Undefined control sequence."));
        assert!(result.excerpt.contains("l.4 \\badmacro"));
    }

    #[test]
    fn test_file_not_found() {
        let log = "! LaTeX Error: File `nonexistent.sty' not found.\n";
        let result = interpret(log);
        assert_eq!(result.message, MSG_FILE_NOT_FOUND);
    }

    #[test]
    fn test_missing_token() {
        let log = "(./main.tex\n! Missing $ inserted.\n<inserted text>\n";
        let result = interpret(log);
        assert_eq!(result.message, MSG_MISSING_TOKEN);
    }

    #[test]
    fn test_emergency_stop() {
        let log = "! Emergency stop.\n<*> main.tex\n";
        let result = interpret(log);
        assert_eq!(result.message, MSG_EMERGENCY_STOP);
    }

    #[test]
    fn test_priority_order_prefers_undefined_over_missing() {
        // A line matching two patterns must resolve to the higher-priority one.
        let log = "! Undefined control sequence. Missing argument follows.\n";
        let result = interpret(log);
        assert_eq!(result.message, MSG_UNDEFINED_COMMAND);
    }

    #[test]
    fn test_first_marked_line_wins() {
        let log = "! Emergency stop.\n! Undefined control sequence.\n";
        let result = interpret(log);
        assert_eq!(result.message, MSG_EMERGENCY_STOP);
    }

    #[test]
    fn test_unrecognized_error_line_is_stripped_raw() {
        let log = "! Dimension too large.\nl.12 \\hugebox\n";
        let result = interpret(log);
        assert_eq!(result.message, "Dimension too large.");
    }

    #[test]
    fn test_no_marker_falls_back_to_tail_excerpt() {
        let log = "line one\n\nline two\nline three\nline four\nline five\nline six\n";
        let result = interpret(log);
        assert_eq!(result.message, MSG_GENERIC_FAILURE);
        // Last five non-empty lines, in original order.
        assert_eq!(
            result.excerpt,
            "line two\nline three\nline four\nline five\nline six"
        );
    }

    #[test]
    fn test_empty_log() {
        let result = interpret("");
        assert_eq!(result.message, MSG_GENERIC_FAILURE);
        assert!(result.excerpt.is_empty());
    }

    #[test]
    fn test_bare_marker_line_falls_back_to_generic() {
        let result = interpret("!   \n");
        assert_eq!(result.message, MSG_GENERIC_FAILURE);
    }
}
