//! # Provisioning
//!
//! - [`template`] - builds (or reuses) one template database per physical test database,
//!   once per run, in the controller or solo process
//! - [`clone`] - copies every template into worker-scoped databases named
//!   `<template>_<suffix>`, once per worker process
//!
//! Both provisioners stage their results and only repoint the
//! [`ConnectionRegistry`](crate::registry::ConnectionRegistry) after every engine call has
//! succeeded, so a failed setup never leaves some aliases switched and others not.

pub mod clone;
pub mod template;

pub use clone::{CloneSet, WorkerCloneProvisioner, WorkerIdentity};
pub use template::{TemplateProvisioner, TemplateSet};
