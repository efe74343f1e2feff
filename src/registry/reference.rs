//! # Image References
//!
//! Parsing of `[registry/]repository[:tag][@digest]` references.

use crate::registry::RegistryError;

pub const DOCKER_HUB_REGISTRY: &str = "registry-1.docker.io";
const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    /// Tag or digest used to fetch the manifest
    pub reference: String,
}

impl ImageReference {
    pub fn parse(image: &str) -> Result<Self, RegistryError> {
        let image = image.trim();
        if image.is_empty() || image.contains(char::is_whitespace) {
            return Err(RegistryError::InvalidReference(image.to_string()));
        }

        let (name, digest) = match image.split_once('@') {
            Some((name, digest)) => (name, Some(digest)),
            None => (image, None),
        };

        let (registry, path) = match name.split_once('/') {
            Some((first, rest)) if is_registry_host(first) => (first.to_string(), rest),
            _ => (DOCKER_HUB_REGISTRY.to_string(), name),
        };

        let (repository, tag) = match path.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo, Some(tag)),
            _ => (path, None),
        };

        if repository.is_empty() || tag.is_some_and(str::is_empty) || digest.is_some_and(str::is_empty) {
            return Err(RegistryError::InvalidReference(image.to_string()));
        }

        let repository = if registry == DOCKER_HUB_REGISTRY && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository.to_string()
        };

        let reference = digest
            .or(tag)
            .unwrap_or(DEFAULT_TAG)
            .to_string();

        Ok(Self {
            registry,
            repository,
            reference,
        })
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let separator = if self.reference.contains(':') { '@' } else { ':' };
        write!(f, "{}/{}{}{}", self.registry, self.repository, separator, self.reference)
    }
}

fn is_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tenant_image() {
        let reference = ImageReference::parse("abc.live.dynatrace.com/linux/activegate:1.2.3").unwrap();
        assert_eq!(reference.registry, "abc.live.dynatrace.com");
        assert_eq!(reference.repository, "linux/activegate");
        assert_eq!(reference.reference, "1.2.3");
        assert_eq!(reference.to_string(), "abc.live.dynatrace.com/linux/activegate:1.2.3");
    }

    #[test]
    fn test_parse_defaults() {
        let reference = ImageReference::parse("busybox").unwrap();
        assert_eq!(reference.registry, DOCKER_HUB_REGISTRY);
        assert_eq!(reference.repository, "library/busybox");
        assert_eq!(reference.reference, "latest");

        let reference = ImageReference::parse("localhost:5000/linux/activegate").unwrap();
        assert_eq!(reference.registry, "localhost:5000");
        assert_eq!(reference.reference, "latest");
    }

    #[test]
    fn test_parse_digest() {
        let digest = "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        let reference = ImageReference::parse(&format!("reg.example/linux/activegate:1.0@{digest}")).unwrap();
        assert_eq!(reference.repository, "linux/activegate");
        assert_eq!(reference.reference, digest);
        assert_eq!(reference.to_string(), format!("reg.example/linux/activegate@{digest}"));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("reg.example/").is_err());
        assert!(ImageReference::parse("reg.example/repo:").is_err());
        assert!(ImageReference::parse("has space").is_err());
    }
}
