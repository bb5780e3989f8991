//! High-level processing helpers that chain the reconstruction stages.

use std::collections::BTreeMap;

use log::debug;
use rayon::prelude::*;
use rustpad_core::{
    DeclusterConfig, DeclusterStatistics, DetectionElement, Digit, HitIndex, HitStore, PadId,
    ResponseModel, Result, Segmentation,
};

use crate::extraction::ClusterExtractor;
use crate::precluster::PreclusterBuilder;

/// Hits and counters of one detection element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementOutput {
    pub hits: HitStore,
    /// Hit that consumed each pad, indexing `hits`.
    pub owners: BTreeMap<PadId, HitIndex>,
    pub statistics: DeclusterStatistics,
}

/// Digits of one detection element within an event.
#[derive(Debug, Clone, Copy)]
pub struct ElementDigits<'a, S> {
    pub element: &'a DetectionElement<S>,
    pub digits: &'a [Digit],
}

impl<'a, S> ElementDigits<'a, S> {
    pub fn new(element: &'a DetectionElement<S>, digits: &'a [Digit]) -> Self {
        Self { element, digits }
    }
}

/// Hits of a whole event, ordered by input element then extraction order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventOutput {
    pub hits: HitStore,
    /// Owning hit of each consumed pad, keyed by detection element id and
    /// indexing the event-wide `hits`.
    pub owners: BTreeMap<(u32, PadId), HitIndex>,
    pub statistics: DeclusterStatistics,
}

/// Reconstructs the hits of one detection element.
///
/// Preclusters are pulled from the builder until the pool is exhausted; pads
/// a precluster did not turn into hits are handed back to the pool. The
/// pad-to-hit links recorded in the pool are returned in
/// [`ElementOutput::owners`].
///
/// # Errors
/// Returns [`rustpad_core::Error::InvalidConfig`] for out-of-range
/// configuration and propagates pixel-grid and plateau-budget failures.
pub fn decluster_element<S, R>(
    element: &DetectionElement<S>,
    digits: &[Digit],
    response: &R,
    config: &DeclusterConfig,
) -> Result<ElementOutput>
where
    S: Segmentation,
    R: ResponseModel + ?Sized,
{
    config.validate()?;
    response.config().validate()?;

    let mut builder =
        PreclusterBuilder::new(element, digits, response.config().zero_suppression, config);
    let extractor = ClusterExtractor::new(element, response, config);
    let mut hits = HitStore::new();
    let mut maxima_found = 0;
    let mut hits_emitted = 0;
    let mut hits_discarded = 0;
    let mut degeneracies = 0;

    while let Some(precluster) = builder.next_precluster() {
        let extraction = extractor.extract(&precluster)?;
        maxima_found += extraction.maxima_found;
        hits_discarded += extraction.hits_discarded;
        degeneracies += extraction.degeneracies;

        let indices: Vec<_> = extraction
            .hits
            .into_iter()
            .map(|hit| hits.append(hit))
            .collect();
        hits_emitted += indices.len();

        for (i, assigned) in extraction.assignment.iter().enumerate() {
            let Some(slot) = precluster.slot(i) else {
                continue;
            };
            match assigned {
                Some(ordinal) => builder.assign_owner(slot, indices[*ordinal]),
                None => builder.release(slot),
            }
        }
    }

    let owners = builder.owners().collect();
    let mut statistics = builder.into_statistics();
    statistics.maxima_found += maxima_found;
    statistics.hits_emitted += hits_emitted;
    statistics.hits_discarded += hits_discarded;
    statistics.degeneracies_clamped += degeneracies;
    debug!(
        "DE {}: {} hits from {} preclusters ({} discarded)",
        element.id(),
        statistics.hits_emitted,
        statistics.preclusters_built,
        statistics.preclusters_discarded
    );
    Ok(ElementOutput {
        hits,
        owners,
        statistics,
    })
}

/// Reconstructs every detection element of an event in parallel.
///
/// Results are concatenated in input order, so the output does not depend on
/// thread scheduling.
///
/// # Errors
/// Returns the first failure in input order.
pub fn decluster_event<S, R>(
    elements: &[ElementDigits<'_, S>],
    response: &R,
    config: &DeclusterConfig,
) -> Result<EventOutput>
where
    S: Segmentation,
    R: ResponseModel + ?Sized,
{
    let outputs: Vec<Result<ElementOutput>> = elements
        .par_iter()
        .map(|e| decluster_element(e.element, e.digits, response, config))
        .collect();

    let mut event = EventOutput::default();
    for (input, output) in elements.iter().zip(outputs) {
        let output = output?;
        let offset = event.hits.len();
        let id = input.element.id();
        event.owners.extend(
            output
                .owners
                .into_iter()
                .map(|(pad, hit)| ((id, pad), offset + hit)),
        );
        event.hits.extend_from(output.hits);
        event.statistics.merge(&output.statistics);
    }
    Ok(event)
}
