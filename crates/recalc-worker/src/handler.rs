//! Request dispatch.
//!
//! Maps each [`Request`] onto the engine. Only a failed Load Sheet produces
//! an `error` response; every other failure is reported in-band.

use std::time::Instant;

use recalc_core::{
    CellAddress, CellContent, CellError, CellRef, CellStore, CellValue, Engine, Evaluator,
};

use crate::protocol::{BatchItem, BatchResult, Request, Response};

/// Handle one request. `None` means the request gets no response.
pub async fn handle_request<S, E>(engine: &Engine<S, E>, request: Request) -> Option<Response>
where
    S: CellStore,
    E: Evaluator,
{
    let response = match request {
        Request::Calculate {
            sheet_id,
            formula,
            cell_ref,
        } => {
            let started = Instant::now();
            let result = match CellRef::parse(&cell_ref) {
                Some(cell_ref) => engine.calculate(&sheet_id, cell_ref, &formula).await,
                None => {
                    tracing::warn!("Invalid cell reference '{}' in calculate", cell_ref);
                    CellError::Ref.into()
                }
            };
            Response::Calculated {
                result,
                duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            }
        }

        Request::BatchCalculate { sheet_id, items } => Response::BatchCalculated {
            results: batch_calculate(engine, &sheet_id, items).await,
        },

        Request::LoadSheet { sheet_id } => match engine.load_sheet(&sheet_id).await {
            Ok(handle) => Response::SheetLoaded { handle },
            Err(e) => {
                tracing::warn!("Failed to load sheet '{}': {}", sheet_id, e);
                Response::Error {
                    message: e.to_string(),
                }
            }
        },

        Request::GetDependencies { sheet_id, cell_ref } => {
            let deps = CellRef::parse(&cell_ref)
                .map(|cell_ref| engine.dependencies(&sheet_id, cell_ref))
                .unwrap_or_default();
            Response::Dependencies {
                precedents: refs(deps.precedents),
                dependents: refs(deps.dependents),
            }
        }

        Request::Invalidate { sheet_id, row, col } => Response::Invalidated {
            count: engine.invalidate(&sheet_id, row, col).invalidated.len(),
        },

        Request::UpdateCell {
            sheet_id,
            row,
            col,
            value,
            formula,
        } => {
            let contents = CellContent::from_parts(&value, formula.as_deref());
            Response::CellUpdated {
                count: engine.update_cell(&sheet_id, row, col, contents).invalidated.len(),
            }
        }

        Request::CheckCircularRefs { sheet_id } => {
            let report = engine.check_circular(&sheet_id);
            Response::CircularRefs {
                has_circular_refs: report.has_circular_refs,
                circular_cells: refs(report.circular_cells),
            }
        }

        Request::CacheStats => Response::CacheStats(engine.stats()),

        Request::ClearCache => {
            engine.clear_cache();
            Response::CacheCleared
        }

        Request::Unknown => {
            tracing::warn!("Ignoring unknown request type");
            return None;
        }
    };

    Some(response)
}

/// Run a batch through the engine. Items with an unparseable reference get
/// `#REF!` and are not evaluated.
async fn batch_calculate<S, E>(
    engine: &Engine<S, E>,
    sheet_id: &str,
    items: Vec<BatchItem>,
) -> Vec<BatchResult>
where
    S: CellStore,
    E: Evaluator,
{
    let valid: Vec<(CellRef, &str)> = items
        .iter()
        .filter_map(|item| CellRef::parse(&item.cell_ref).map(|r| (r, item.formula.as_str())))
        .collect();
    let mut computed = engine.batch_calculate(sheet_id, &valid).await.into_iter();

    items
        .iter()
        .map(|item| {
            let result = match CellRef::parse(&item.cell_ref) {
                Some(_) => computed
                    .next()
                    .map(|(_, value)| value)
                    .unwrap_or(CellValue::Error(CellError::Error)),
                None => CellError::Ref.into(),
            };
            BatchResult {
                cell_ref: item.cell_ref.clone(),
                result,
            }
        })
        .collect()
}

fn refs(addresses: Vec<CellAddress>) -> Vec<CellRef> {
    addresses.iter().map(CellAddress::cell_ref).collect()
}
