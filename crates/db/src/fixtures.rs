//! Starter tariff index content for local runs and tests.

use landcost_core::domain::tariff::TariffCode;
use landcost_core::errors::ApplicationError;
use landcost_core::tariff::{IndexSearchOptions, TariffIndex, TariffIndexEntry};

struct SeedEntry {
    code: &'static str,
    label: &'static str,
    breadcrumb: &'static [&'static str],
}

const MACHINERY: &[&str] = &["Sección XVI", "Capítulo 84"];
const VEHICLES: &[&str] = &["Sección XVII", "Capítulo 87"];

const SEED_ENTRIES: &[SeedEntry] = &[
    SeedEntry {
        code: "8427.10.11",
        label: "Carretillas apiladoras autopropulsadas con motor eléctrico, con capacidad de carga inferior o igual a 3,5 t",
        breadcrumb: MACHINERY,
    },
    SeedEntry {
        code: "8427.10.19",
        label: "Las demás carretillas apiladoras autopropulsadas con motor eléctrico",
        breadcrumb: MACHINERY,
    },
    SeedEntry {
        code: "8427.20.10",
        label: "Carretillas apiladoras autopropulsadas con motor de combustión",
        breadcrumb: MACHINERY,
    },
    SeedEntry { code: "8428.10.00", label: "Ascensores y montacargas", breadcrumb: MACHINERY },
    SeedEntry {
        code: "8429.52.19",
        label: "Palas mecánicas y excavadoras con superestructura giratoria de 360°",
        breadcrumb: MACHINERY,
    },
    SeedEntry { code: "8474.31.00", label: "Hormigoneras y aparatos de amasar mortero", breadcrumb: MACHINERY },
    SeedEntry {
        code: "8701.21.00",
        label: "Tractores de carretera para semirremolques, únicamente con motor de émbolo de encendido por compresión",
        breadcrumb: VEHICLES,
    },
    SeedEntry { code: "8701.91.00", label: "Los demás tractores de potencia inferior o igual a 18 kW", breadcrumb: VEHICLES },
    SeedEntry {
        code: "8704.21.10",
        label: "Vehículos para transporte de mercancías, volquete, de peso total con carga máxima inferior o igual a 5 t",
        breadcrumb: VEHICLES,
    },
    SeedEntry {
        code: "8704.21.90",
        label: "Los demás vehículos para transporte de mercancías de peso total con carga máxima inferior o igual a 5 t",
        breadcrumb: VEHICLES,
    },
    SeedEntry {
        code: "8704.22.10",
        label: "Vehículos para transporte de mercancías, volquete, de peso total con carga máxima superior a 5 t pero inferior o igual a 20 t",
        breadcrumb: VEHICLES,
    },
    SeedEntry {
        code: "8704.22.20",
        label: "Vehículos para transporte de mercancías, con caja refrigerada, de peso total con carga máxima superior a 5 t pero inferior o igual a 20 t",
        breadcrumb: VEHICLES,
    },
    SeedEntry {
        code: "8704.23.10",
        label: "Vehículos para transporte de mercancías, volquete, de peso total con carga máxima superior a 20 t",
        breadcrumb: VEHICLES,
    },
    SeedEntry {
        code: "8716.39.00",
        label: "Los demás remolques y semirremolques para transporte de mercancías",
        breadcrumb: VEHICLES,
    },
];

/// Seed data set and a lightweight verification of what it promises.
pub struct TariffSeedDataset;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub entries_loaded: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationResult {
    pub missing_codes: Vec<String>,
    pub headings: Vec<String>,
}

impl VerificationResult {
    pub fn is_complete(&self) -> bool {
        self.missing_codes.is_empty()
    }
}

impl TariffSeedDataset {
    pub fn entries() -> Result<Vec<TariffIndexEntry>, ApplicationError> {
        SEED_ENTRIES
            .iter()
            .map(|seed| {
                let code = TariffCode::parse(seed.code)?;
                Ok(TariffIndexEntry::new(
                    code,
                    seed.label,
                    seed.breadcrumb.iter().map(|part| part.to_string()).collect(),
                ))
            })
            .collect()
    }

    pub async fn load(index: &dyn TariffIndex) -> Result<SeedResult, ApplicationError> {
        let entries = Self::entries()?;
        index.upsert(&entries).await?;
        Ok(SeedResult { entries_loaded: entries.len() })
    }

    pub async fn verify(index: &dyn TariffIndex) -> Result<VerificationResult, ApplicationError> {
        let mut missing_codes = Vec::new();
        let mut headings: Vec<String> = Vec::new();
        for seed in SEED_ENTRIES {
            let code = TariffCode::parse(seed.code)?;
            match index.get(&code).await? {
                Some(_) => {
                    let heading = code.heading().to_string();
                    if !headings.contains(&heading) {
                        headings.push(heading);
                    }
                }
                None => missing_codes.push(seed.code.to_string()),
            }
        }
        Ok(VerificationResult { missing_codes, headings })
    }

    /// Number of seeded entries reachable by a free-text query under `heading`.
    pub async fn count_under(
        index: &dyn TariffIndex,
        query: &str,
        heading: &str,
    ) -> Result<usize, ApplicationError> {
        let options = IndexSearchOptions { limit: SEED_ENTRIES.len(), heading_filter: Some(heading.to_string()) };
        Ok(index.search(query, &options).await?.len())
    }
}
