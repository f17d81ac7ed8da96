//! Form-based login / register handler.
//!
//! A decoded POST form targeting `/login.html` or `/register.html` is
//! checked against the `user` table through a scoped [`DbPool`] handle.
//! The decision logic itself ([`decide`]) is kept independent of the
//! database so it can be unit tested without a live MariaDB/MySQL
//! server; [`authenticate`] is the thin production wrapper that
//! supplies real queries.

use std::collections::HashMap;

use mysql::prelude::Queryable;

use crate::error::{Error, Result};
use crate::pool::DbPool;

/// Which landing page a decoded POST targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    Login,
    Register,
}

/// Maps a normalized request path to the auth action it triggers, if
/// any.
pub fn action_for_path(path: &str) -> Option<AuthAction> {
    match path {
        "/login.html" => Some(AuthAction::Login),
        "/register.html" => Some(AuthAction::Register),
        _ => None,
    }
}

/// Runs the login/register flow for `form` against the database pool,
/// returning the path the response should redirect to. Any pool or
/// query failure is treated as an authentication failure, never
/// propagated as a hard error.
pub fn authenticate(action: AuthAction, form: &HashMap<String, String>, db: &DbPool) -> String {
    let username = form.get("username").map(String::as_str).unwrap_or("");
    let password = form.get("password").map(String::as_str).unwrap_or("");

    let lookup = |username: &str| -> Result<Option<String>> {
        let mut conn = db.acquire()?;
        conn.exec_first(
            "SELECT password FROM user WHERE username = ? LIMIT 1",
            (username,),
        )
        .map_err(Error::Db)
    };

    let insert = |username: &str, password: &str| -> Result<bool> {
        let mut conn = db.acquire()?;
        conn.exec_drop(
            "INSERT INTO user(username, password) VALUES (?, ?)",
            (username, password),
        )
        .map_err(Error::Db)?;
        Ok(true)
    };

    decide(action, username, password, lookup, insert).to_string()
}

/// Pure decision logic shared by [`authenticate`] and its tests. `lookup`
/// returns the stored password for `username`, if a row exists; `insert`
/// performs the registration insert and reports whether it succeeded.
fn decide(
    action: AuthAction,
    username: &str,
    password: &str,
    lookup: impl FnOnce(&str) -> Result<Option<String>>,
    insert: impl FnOnce(&str, &str) -> Result<bool>,
) -> &'static str {
    if username.is_empty() || password.is_empty() {
        return "/error.html";
    }

    let existing = match lookup(username) {
        Ok(row) => row,
        Err(_) => return "/error.html",
    };

    match action {
        AuthAction::Login => match existing {
            Some(stored) if stored == password => "/welcome.html",
            _ => "/error.html",
        },
        // Register succeeds iff the username was previously absent AND
        // the insert itself succeeded.
        AuthAction::Register => match existing {
            Some(_) => "/error.html",
            None => match insert(username, password) {
                Ok(true) => "/welcome.html",
                Ok(false) | Err(_) => "/error.html",
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_username_or_password_is_rejected() {
        let result = decide(
            AuthAction::Login,
            "",
            "pw",
            |_| Ok(None),
            |_, _| Ok(true),
        );
        assert_eq!(result, "/error.html");

        let result = decide(
            AuthAction::Register,
            "user",
            "",
            |_| Ok(None),
            |_, _| Ok(true),
        );
        assert_eq!(result, "/error.html");
    }

    #[test]
    fn login_succeeds_when_password_matches() {
        let result = decide(
            AuthAction::Login,
            "alice",
            "secret",
            |_| Ok(Some("secret".to_string())),
            |_, _| Ok(true),
        );
        assert_eq!(result, "/welcome.html");
    }

    #[test]
    fn login_fails_when_password_does_not_match() {
        let result = decide(
            AuthAction::Login,
            "alice",
            "wrong",
            |_| Ok(Some("secret".to_string())),
            |_, _| Ok(true),
        );
        assert_eq!(result, "/error.html");
    }

    #[test]
    fn login_fails_when_user_absent() {
        let result = decide(
            AuthAction::Login,
            "ghost",
            "secret",
            |_| Ok(None),
            |_, _| Ok(true),
        );
        assert_eq!(result, "/error.html");
    }

    #[test]
    fn register_succeeds_when_username_absent_and_insert_ok() {
        let result = decide(
            AuthAction::Register,
            "newuser",
            "secret",
            |_| Ok(None),
            |_, _| Ok(true),
        );
        assert_eq!(result, "/welcome.html");
    }

    #[test]
    fn register_fails_on_duplicate_username() {
        let result = decide(
            AuthAction::Register,
            "alice",
            "secret",
            |_| Ok(Some("anything".to_string())),
            |_, _| panic!("insert must not run for a duplicate username"),
        );
        assert_eq!(result, "/error.html");
    }

    #[test]
    fn register_fails_when_insert_errors() {
        let result = decide(
            AuthAction::Register,
            "newuser",
            "secret",
            |_| Ok(None),
            |_, _| Err(Error::DbPoolClosed),
        );
        assert_eq!(result, "/error.html");
    }

    #[test]
    fn path_mapping_covers_login_and_register_only() {
        assert_eq!(action_for_path("/login.html"), Some(AuthAction::Login));
        assert_eq!(
            action_for_path("/register.html"),
            Some(AuthAction::Register)
        );
        assert_eq!(action_for_path("/index.html"), None);
    }
}
