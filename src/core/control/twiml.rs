//! Minimal TwiML document builder.
//!
//! Only the verbs the bridge emits are modelled. Text and attribute values
//! are XML-escaped on render.

use std::borrow::Cow;
use std::fmt::Write as _;

/// Speech capture settings for `<Gather input="speech">`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gather {
    pub action: String,
    pub language: Option<String>,
    /// `auto` or a number of seconds.
    pub speech_timeout: String,
    /// Prompt spoken while gathering.
    pub prompt: Option<String>,
}

impl Gather {
    pub fn speech(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            language: None,
            speech_timeout: "auto".to_string(),
            prompt: None,
        }
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Verb {
    Say(String),
    Play(String),
    Pause(u32),
    Gather(Gather),
    ConnectStream {
        url: String,
        parameters: Vec<(String, String)>,
    },
    Redirect(String),
    Hangup,
}

/// A `<Response>` document under construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TwimlResponse {
    verbs: Vec<Verb>,
}

impl TwimlResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: impl Into<String>) -> Self {
        self.verbs.push(Verb::Say(text.into()));
        self
    }

    pub fn play(mut self, url: impl Into<String>) -> Self {
        self.verbs.push(Verb::Play(url.into()));
        self
    }

    pub fn pause(mut self, seconds: u32) -> Self {
        self.verbs.push(Verb::Pause(seconds));
        self
    }

    pub fn gather(mut self, gather: Gather) -> Self {
        self.verbs.push(Verb::Gather(gather));
        self
    }

    /// `<Connect><Stream url="...">` with optional custom parameters.
    pub fn connect_stream(
        mut self,
        url: impl Into<String>,
        parameters: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        self.verbs.push(Verb::ConnectStream {
            url: url.into(),
            parameters: parameters.into_iter().collect(),
        });
        self
    }

    pub fn redirect(mut self, url: impl Into<String>) -> Self {
        self.verbs.push(Verb::Redirect(url.into()));
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push(Verb::Hangup);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.verbs.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::with_capacity(128 + self.verbs.len() * 64);
        out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#);
        for verb in &self.verbs {
            render_verb(&mut out, verb);
        }
        out.push_str("</Response>");
        out
    }
}

fn render_verb(out: &mut String, verb: &Verb) {
    // Writing into a String cannot fail.
    let _ = match verb {
        Verb::Say(text) => write!(out, "<Say>{}</Say>", escape(text)),
        Verb::Play(url) => write!(out, "<Play>{}</Play>", escape(url)),
        Verb::Pause(seconds) => write!(out, r#"<Pause length="{seconds}"/>"#),
        Verb::Gather(gather) => {
            let _ = write!(
                out,
                r#"<Gather input="speech" action="{}" method="POST" speechTimeout="{}""#,
                escape(&gather.action),
                escape(&gather.speech_timeout)
            );
            if let Some(language) = &gather.language {
                let _ = write!(out, r#" language="{}""#, escape(language));
            }
            match &gather.prompt {
                Some(prompt) => write!(out, "><Say>{}</Say></Gather>", escape(prompt)),
                None => write!(out, "/>"),
            }
        }
        Verb::ConnectStream { url, parameters } => {
            let _ = write!(out, r#"<Connect><Stream url="{}""#, escape(url));
            if parameters.is_empty() {
                write!(out, "/></Connect>")
            } else {
                out.push('>');
                for (name, value) in parameters {
                    let _ = write!(
                        out,
                        r#"<Parameter name="{}" value="{}"/>"#,
                        escape(name),
                        escape(value)
                    );
                }
                write!(out, "</Stream></Connect>")
            }
        }
        Verb::Redirect(url) => write!(out, r#"<Redirect method="POST">{}</Redirect>"#, escape(url)),
        Verb::Hangup => write!(out, "<Hangup/>"),
    };
}

pub fn escape(input: &str) -> Cow<'_, str> {
    if !input.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(input);
    }
    let mut escaped = String::with_capacity(input.len() + 16);
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}
