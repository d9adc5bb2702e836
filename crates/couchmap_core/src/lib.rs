//! # Couchmap Core
//!
//! Session and entity-tracking engine for couchmap: an object-document
//! mapping client for revisioned JSON document stores.
//!
//! This crate provides:
//! - [`Mapping`] - explicit, immutable-after-build entity configuration
//! - [`Session`] - save/load/delete/query over a unit-of-work cache, with
//!   single-flight bulk commits
//! - [`TrackedDocument`] - the document-entity wrapper with dirty detection
//! - [`UnitOfWork`] - the session cache, indexed by document id and by
//!   entity reference
//! - [`BlockingSession`] - a synchronous facade for non-async callers
//!
//! ## Lifecycle
//!
//! Entities enter a session through [`Session::save`] or [`Session::load`]
//! and stay tracked until deleted or the session is dropped. Within one
//! session the same document id always resolves to the same entity
//! reference. Mutations accumulate on tracked entities and are committed in
//! one bulk call by [`Session::save_changes`], which writes the
//! server-assigned revisions back onto the entities.
//!
//! ```rust,ignore
//! let mapping = Mapping::builder()
//!     .entity(
//!         EntityConfig::new(
//!             "user",
//!             |u: &User| u.id.clone(),
//!             |u: &mut User, id| u.id = id,
//!         )
//!         .revision(|u: &User| u.revision.clone(), |u, rev| u.revision = Some(rev))
//!         .generate_uuid_ids(),
//!     )
//!     .build()?;
//!
//! let factory = SessionFactory::new(store, Arc::new(mapping));
//! let session = factory.open_session();
//!
//! let user = shared(User { name: "John Smith".into(), ..Default::default() });
//! session.save(&user).await?;
//! user.write().age = 42;
//! session.save_changes().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod blocking;
mod cache;
mod error;
mod mapping;
mod query;
mod session;
mod tracked;

pub use blocking::BlockingSession;
pub use cache::UnitOfWork;
pub use error::{MappingError, SessionError, SessionResult};
pub use mapping::{shared, Entity, EntityConfig, Mapping, MappingBuilder, Shared};
pub use query::Page;
pub use session::{FlushReport, Session, SessionFactory};
pub use tracked::TrackedDocument;
