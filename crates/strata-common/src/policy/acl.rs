//! ACL file compiler
//!
//! Renders credentials into the user-definition syntax shared by Valkey and
//! Dragonfly. Two fixed grammars are supported:
//!
//! - [`AclGrammar::AppendOnly`]: default user locked down, one line per
//!   credential, AOF persistence with RDB snapshots disabled.
//! - [`AclGrammar::Replicated`]: additionally declares the sentinel and replica
//!   users a replicated deployment needs, with RDB snapshots enabled.
//!
//! Output is validated after rendering; an empty or placeholder file is never
//! handed to a workload.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::template::TemplateEngine;
use crate::{Error, Result};

const APPEND_ONLY_TEMPLATE: &str = "\
user default on nopass -@ALL +PING +AUTH
{% for user in users %}
user {{ user.username }} on >{{ user.password }}{{ user.tokens }}
{% endfor %}
appendonly yes
save \"\"
";

const REPLICATED_TEMPLATE: &str = "\
user default on nopass -@ALL +PING +AUTH
user sentinel-user on >{{ sentinel_password }} allchannels +multi +slaveof +ping +exec +subscribe +config|rewrite +role +publish +info +client|setname +client|kill +script|kill
user replica-user on >{{ replica_password }} +psync +replconf +ping
{% for user in users %}
user {{ user.username }} on >{{ user.password }}{{ user.tokens }}
{% endfor %}
appendonly no
save 3600 1 300 100 60 10000
";

/// A user entry for an ACL file
///
/// Permission tokens (`+GET`, `~*`, `-@ALL`, ...) are passed through verbatim.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCredential", rename_all = "camelCase")]
pub struct Credential {
    username: String,
    password: String,
    permissions: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCredential {
    username: String,
    password: String,
    #[serde(default)]
    permissions: Vec<String>,
}

impl TryFrom<RawCredential> for Credential {
    type Error = Error;

    fn try_from(raw: RawCredential) -> Result<Self> {
        Credential::new(raw.username, raw.password, raw.permissions)
    }
}

impl Credential {
    /// Create a credential
    ///
    /// Username and password must be non-empty and free of whitespace; either
    /// would break the one-line-per-user file format.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        permissions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self> {
        let username = username.into();
        let password = password.into();
        check_word(&username, "username", &username)?;
        check_word(&username, "password", &password)?;
        Ok(Self {
            username,
            password,
            permissions: permissions.into_iter().map(Into::into).collect(),
        })
    }

    /// The username
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The plaintext password
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Permission tokens in declaration order
    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("permissions", &self.permissions)
            .finish()
    }
}

fn check_word(owner: &str, field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::validation_for_field(
            credential_context(owner),
            field,
            "must not be empty",
        ));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(Error::validation_for_field(
            credential_context(owner),
            field,
            "must not contain whitespace",
        ));
    }
    Ok(())
}

fn credential_context(username: &str) -> String {
    if username.is_empty() {
        "credential".to_string()
    } else {
        format!("credential {}", username)
    }
}

/// Passwords for the fixed users of a replicated deployment
#[derive(Clone, PartialEq, Eq)]
pub struct ReplicationUsers {
    sentinel_password: String,
    replica_password: String,
}

impl ReplicationUsers {
    /// Create the replication user set; both passwords follow the credential
    /// password rules
    pub fn new(sentinel_password: impl Into<String>, replica_password: impl Into<String>) -> Result<Self> {
        let sentinel_password = sentinel_password.into();
        let replica_password = replica_password.into();
        check_word("sentinel-user", "password", &sentinel_password)?;
        check_word("replica-user", "password", &replica_password)?;
        Ok(Self {
            sentinel_password,
            replica_password,
        })
    }
}

impl fmt::Debug for ReplicationUsers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReplicationUsers { .. }")
    }
}

/// Which ACL file layout to produce
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AclGrammar {
    /// Append-only persistence, no replication users (Dragonfly)
    AppendOnly,
    /// Replicated deployment with sentinel and replica users (Valkey)
    Replicated(ReplicationUsers),
}

impl AclGrammar {
    /// Template name used in errors and logs
    pub fn template_name(&self) -> &'static str {
        match self {
            AclGrammar::AppendOnly => "append-only.acl",
            AclGrammar::Replicated(_) => "replicated.acl",
        }
    }

    fn template(&self) -> &'static str {
        match self {
            AclGrammar::AppendOnly => APPEND_ONLY_TEMPLATE,
            AclGrammar::Replicated(_) => REPLICATED_TEMPLATE,
        }
    }
}

/// A validated ACL file
#[derive(Clone, PartialEq, Eq)]
pub struct RenderedPolicy {
    text: String,
    grammar: AclGrammar,
    credential_count: usize,
}

impl RenderedPolicy {
    /// The ACL file contents
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Grammar the file was rendered with
    pub fn grammar(&self) -> &AclGrammar {
        &self.grammar
    }

    /// Number of caller-supplied credentials in the file
    pub fn credential_count(&self) -> usize {
        self.credential_count
    }
}

impl fmt::Debug for RenderedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderedPolicy")
            .field("grammar", &self.grammar.template_name())
            .field("credential_count", &self.credential_count)
            .field("bytes", &self.text.len())
            .finish()
    }
}

#[derive(Serialize)]
struct UserLine<'a> {
    username: &'a str,
    password: &'a str,
    tokens: String,
}

impl<'a> From<&'a Credential> for UserLine<'a> {
    fn from(credential: &'a Credential) -> Self {
        let tokens = if credential.permissions.is_empty() {
            String::new()
        } else {
            format!(" {}", credential.permissions.join(" "))
        };
        Self {
            username: &credential.username,
            password: &credential.password,
            tokens,
        }
    }
}

#[derive(Serialize)]
struct AppendOnlyContext<'a> {
    users: Vec<UserLine<'a>>,
}

#[derive(Serialize)]
struct ReplicatedContext<'a> {
    sentinel_password: &'a str,
    replica_password: &'a str,
    users: Vec<UserLine<'a>>,
}

/// Compiles credentials into an ACL file for one grammar
pub struct PolicyCompiler {
    grammar: AclGrammar,
    require_credentials: bool,
    engine: TemplateEngine,
}

impl PolicyCompiler {
    /// Create a compiler for the given grammar
    pub fn new(grammar: AclGrammar) -> Self {
        Self {
            grammar,
            require_credentials: false,
            engine: TemplateEngine::new(),
        }
    }

    /// Reject an empty credential list instead of emitting boilerplate only
    pub fn require_credentials(mut self, required: bool) -> Self {
        self.require_credentials = required;
        self
    }

    /// Render the credentials, in order, into a validated ACL file
    ///
    /// Duplicate usernames are rendered as duplicate lines; keeping usernames
    /// unique is the caller's job.
    pub fn compile(&self, credentials: &[Credential]) -> Result<RenderedPolicy> {
        let name = self.grammar.template_name();

        if self.require_credentials && credentials.is_empty() {
            return Err(Error::template_output_invalid(
                name,
                "no credentials supplied",
            ));
        }

        let mut seen = HashSet::new();
        for credential in credentials {
            if !seen.insert(credential.username()) {
                warn!(
                    template = name,
                    username = credential.username(),
                    "duplicate username in ACL credentials, rendering both entries"
                );
            }
        }

        let users: Vec<UserLine<'_>> = credentials.iter().map(UserLine::from).collect();
        let rendered = match &self.grammar {
            AclGrammar::AppendOnly => {
                self.engine
                    .render(name, self.grammar.template(), AppendOnlyContext { users })
            }
            AclGrammar::Replicated(replication) => self.engine.render(
                name,
                self.grammar.template(),
                ReplicatedContext {
                    sentinel_password: &replication.sentinel_password,
                    replica_password: &replication.replica_password,
                    users,
                },
            ),
        }
        .map_err(|source| Error::TemplateRender {
            template: name.to_string(),
            source,
        })?;

        if TemplateEngine::is_no_output(&rendered) {
            return Err(Error::template_output_invalid(
                name,
                "rendered output is empty or a no-value marker",
            ));
        }

        debug!(
            template = name,
            credentials = credentials.len(),
            bytes = rendered.len(),
            "compiled ACL policy"
        );

        Ok(RenderedPolicy {
            text: rendered,
            grammar: self.grammar.clone(),
            credential_count: credentials.len(),
        })
    }
}
