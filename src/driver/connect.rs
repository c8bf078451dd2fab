use std::fmt;

/// Logon target in `username/password@dbname` form.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectString {
    pub username: String,
    pub password: Option<String>,
    pub dbname: String,
}

impl ConnectString {
    #[must_use]
    pub fn new(dbname: impl Into<String>, username: impl Into<String>, password: Option<&str>) -> Self {
        Self {
            username: username.into(),
            password: password.map(str::to_string),
            dbname: dbname.into(),
        }
    }

    /// The form that is safe to log.
    #[must_use]
    pub fn redacted(&self) -> String {
        format!("{}/***@{}", self.username, self.dbname)
    }

    /// `username@dbname`, the identity shown in statement logs.
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}@{}", self.username, self.dbname)
    }
}

impl fmt::Display for ConnectString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}",
            self.username,
            self.password.as_deref().unwrap_or_default(),
            self.dbname
        )
    }
}

impl fmt::Debug for ConnectString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectString").field(&self.redacted()).finish()
    }
}

/// Build a TCP connect descriptor usable as `dbname`.
///
/// A non-empty `service_name` takes precedence over `sid`.
#[must_use]
pub fn make_dsn(host: &str, port: u16, sid: &str, service_name: &str) -> String {
    let connect_data = if service_name.is_empty() {
        format!("(SID={sid})")
    } else {
        format!("(SERVICE_NAME={service_name})")
    };
    format!(
        "(DESCRIPTION=(ADDRESS=(PROTOCOL=TCP)(HOST={host})(PORT={port}))(CONNECT_DATA={connect_data}))"
    )
}
