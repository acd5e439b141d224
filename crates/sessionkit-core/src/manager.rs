//! Session manager: store + cookie hooks + acquisition policy
//!
//! The manager is generic over the transport's reader and writer handles
//! (`R`, `W`). It never touches a transport itself; the cookie hooks do.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cookie::{Cookie, CookieOptions};
use crate::id::{DEFAULT_ID_LENGTH, IdCodec};
use crate::session::Session;
use crate::store::Store;
use crate::{Error, Result};

/// Reads the named cookie from a transport reader; `Ok(None)` if absent
pub type GetCookieHook<R> = Arc<dyn Fn(&str, &R) -> Result<Option<Cookie>> + Send + Sync>;

/// Writes a cookie through a transport writer
pub type SetCookieHook<W> = Arc<dyn Fn(&Cookie, &W) -> Result<()> + Send + Sync>;

pub type GenerateIdHook = Arc<dyn Fn() -> Result<String> + Send + Sync>;

pub type ValidateIdHook = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerOptions {
    /// Create a session in `acquire` when the request carries no token
    pub auto_create: bool,

    /// Length of generated identifiers
    pub id_length: usize,

    /// Attributes of the session cookie
    pub cookie: CookieOptions,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            auto_create: false,
            id_length: DEFAULT_ID_LENGTH,
            cookie: CookieOptions::default(),
        }
    }
}

impl ManagerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create = auto_create;
        self
    }

    pub fn with_id_length(mut self, id_length: usize) -> Self {
        self.id_length = id_length;
        self
    }

    pub fn with_cookie(mut self, cookie: CookieOptions) -> Self {
        self.cookie = cookie;
        self
    }
}

/// Top-level session orchestrator
///
/// Configure it once (`use_store`, `set_cookie_hooks`), then share it across
/// requests. Per request, call [`Manager::acquire`] and thread the returned
/// [`Session`] through the rest of the request: passing it back into
/// `acquire` returns it unchanged.
///
/// # Example
/// ```no_run
/// # use std::collections::HashMap;
/// # use std::sync::{Arc, Mutex};
/// # use sessionkit_core::{Cookie, Manager, ManagerOptions, MemoryStore};
/// # async fn example() -> sessionkit_core::Result<()> {
/// type Jar = HashMap<String, String>;
/// type Out = Arc<Mutex<Vec<Cookie>>>;
///
/// let mut manager: Manager<Jar, Out> =
///     Manager::new(ManagerOptions::new().with_auto_create(true));
/// manager.use_store(Arc::new(MemoryStore::new()));
/// manager.set_cookie_hooks(
///     |name, jar: &Jar| {
///         Ok(jar.get(name).map(|v| Cookie::for_session(&Default::default(), v)))
///     },
///     |cookie, out: &Out| {
///         out.lock().unwrap().push(cookie.clone());
///         Ok(())
///     },
/// );
///
/// let out = Out::default();
/// let session = manager.acquire(None, Jar::new(), out.clone()).await?;
/// session.set("user", "luna").await?;
/// session.commit().await?;
/// # Ok(())
/// # }
/// ```
pub struct Manager<R, W> {
    store: Option<Arc<dyn Store>>,
    get_cookie: Option<GetCookieHook<R>>,
    set_cookie: Option<SetCookieHook<W>>,
    generate_id: GenerateIdHook,
    validate_id: ValidateIdHook,
    options: ManagerOptions,
}

impl<R, W> Manager<R, W> {
    /// Create an unconfigured manager. Identifiers come from an [`IdCodec`]
    /// of `options.id_length` until [`Manager::set_id_hooks`] replaces it.
    pub fn new(options: ManagerOptions) -> Self {
        let codec = IdCodec::new(options.id_length);

        Self {
            store: None,
            get_cookie: None,
            set_cookie: None,
            generate_id: Arc::new(move || codec.generate()),
            validate_id: Arc::new(move |id: &str| codec.validate(id)),
            options,
        }
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub fn use_store(&mut self, store: Arc<dyn Store>) {
        self.store = Some(store);
    }

    pub fn set_cookie_hooks<G, S>(&mut self, get: G, set: S)
    where
        G: Fn(&str, &R) -> Result<Option<Cookie>> + Send + Sync + 'static,
        S: Fn(&Cookie, &W) -> Result<()> + Send + Sync + 'static,
    {
        self.get_cookie = Some(Arc::new(get));
        self.set_cookie = Some(Arc::new(set));
    }

    /// Replace identifier generation and validation as a pair
    pub fn set_id_hooks<G, V>(&mut self, generate: G, validate: V)
    where
        G: Fn() -> Result<String> + Send + Sync + 'static,
        V: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.generate_id = Arc::new(generate);
        self.validate_id = Arc::new(validate);
    }

    fn store(&self) -> Result<Arc<dyn Store>> {
        self.store.clone().ok_or(Error::StoreNotConfigured)
    }

    fn set_cookie_hook(&self) -> Result<SetCookieHook<W>> {
        self.set_cookie.clone().ok_or(Error::CookieHooksNotConfigured)
    }

    /// Create a fresh session and hand its token to the writer.
    ///
    /// The cookie is written only after the store accepted the record.
    pub async fn new_session(&self, writer: W) -> Result<Session<W>> {
        let store = self.store()?;
        let set_cookie = self.set_cookie_hook()?;

        let id = (self.generate_id)()?;
        store.create(&id).await?;

        let session = Session::new(id, store, self.options.cookie.clone(), set_cookie, writer);
        session.emit_cookie()?;

        debug!("Created new session");
        Ok(session)
    }

    /// Resolve the session for the current request.
    ///
    /// - `current` already holds a session: it is returned unchanged and the
    ///   read hook is not called.
    /// - The request carries a well-formed token: a session bound to it is
    ///   returned. The store is not consulted; a stale or forged token only
    ///   fails on first read or write with `Error::InvalidSession`.
    /// - Otherwise a new session is created if `auto_create` is on, else
    ///   `Error::InvalidSession` is returned.
    pub async fn acquire(
        &self,
        current: Option<Session<W>>,
        reader: R,
        writer: W,
    ) -> Result<Session<W>> {
        if let Some(session) = current {
            return Ok(session);
        }

        let store = self.store()?;
        let get_cookie = self.get_cookie.clone().ok_or(Error::CookieHooksNotConfigured)?;
        let set_cookie = self.set_cookie_hook()?;

        let token = get_cookie(&self.options.cookie.name, &reader)?
            .map(|cookie| cookie.value)
            .filter(|value| !value.is_empty() && (self.validate_id)(value));

        match token {
            Some(id) => Ok(Session::new(
                id,
                store,
                self.options.cookie.clone(),
                set_cookie,
                writer,
            )),
            None if self.options.auto_create => {
                debug!("No session token on request, creating one");
                self.new_session(writer).await
            }
            None => Err(Error::InvalidSession),
        }
    }
}
