use crate::config::MicroGemmConfig;
use crate::error::{Error, Result};
use crate::variants::VariantKind;

/// Mutable phase of the registry, each variant kind registers its configs once.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: Vec<(VariantKind, Vec<MicroGemmConfig>)>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: VariantKind, configs: Vec<MicroGemmConfig>) -> Result<&mut Self> {
        if self.entries.iter().any(|(k, _)| *k == kind) {
            return Err(Error::DuplicateRegistration(kind));
        }
        if configs.is_empty() {
            return Err(Error::EmptyConfigs(kind));
        }
        // a dtype tuple on one isa belongs to a single kind
        for config in &configs {
            let owner = self.entries.iter().find_map(|(owner, owned)| {
                owned.iter().any(|c| c.vec_isa == config.vec_isa && c.dtypes() == config.dtypes()).then_some(*owner)
            });
            if let Some(owner) = owner {
                return Err(Error::ConflictingConfig {
                    kind,
                    owner,
                    isa: config.vec_isa,
                    input: config.input_dtype,
                    input2: config.input2_dtype,
                    output: config.output_dtype,
                    compute: config.compute_dtype,
                });
            }
        }
        tracing::trace!(?kind, n_configs = configs.len(), "registered micro gemm configs");
        self.entries.push((kind, configs));
        Ok(self)
    }

    pub fn freeze(self) -> Registry {
        Registry { entries: self.entries }
    }
}

/// Read-only table of variant kinds and their configs, in registration order.
#[derive(Debug)]
pub struct Registry {
    entries: Vec<(VariantKind, Vec<MicroGemmConfig>)>,
}

impl Registry {
    /// Registry holding every builtin variant kind.
    pub fn builtin() -> Result<Registry> {
        let mut builder = RegistryBuilder::new();
        for kind in VariantKind::REGISTERED {
            builder.register(kind, kind.describe_configs())?;
        }
        Ok(builder.freeze())
    }

    pub fn iter(&self) -> impl Iterator<Item = (VariantKind, &MicroGemmConfig)> + '_ {
        self.entries.iter().flat_map(|(kind, configs)| configs.iter().map(move |c| (*kind, c)))
    }

    pub fn kinds(&self) -> impl Iterator<Item = VariantKind> + '_ {
        self.entries.iter().map(|(kind, _)| *kind)
    }

    pub fn configs(&self, kind: VariantKind) -> &[MicroGemmConfig] {
        self.entries.iter().find(|(k, _)| *k == kind).map(|(_, c)| c.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, c)| c.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
