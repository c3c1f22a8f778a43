use super::{
    normalize_road_name, Confidence, LimitSource, RoadClass, SpeedLimitResult, SpeedLimitTier,
    TierQuery,
};

/// Limit inferred from the shape of names returned by the reverse lookup
///
/// Road-name keywords give Medium confidence. A nearby school, hospital or
/// park, or a bare highway class, gives Low.
#[derive(Clone, Copy, Debug, Default)]
pub struct GeocodeHeuristic;

/// Word patterns checked against the normalized road name, in priority order
const ROAD_PATTERNS: [(&[&str], u32); 4] = [
    (&["interstate", "freeway", "expressway", "motorway"], 70),
    (&["school", "hospital"], 25),
    (&["boulevard", "avenue"], 45),
    (&["street", "road", "drive", "lane", "way", "court"], 35),
];

const ZONE_WORDS: [&str; 3] = ["school", "hospital", "park"];
const ZONE_LIMIT_MPH: u32 = 25;

impl GeocodeHeuristic {
    /// Limit implied by the road name alone
    pub fn from_road_name(name: &str) -> Option<u32> {
        let normalized = normalize_road_name(name);
        let words: Vec<&str> = normalized.split(' ').collect();
        ROAD_PATTERNS
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| words.contains(k)))
            .map(|(_, mph)| *mph)
    }

    /// 25 mph when the feature name marks a school, hospital or park zone
    pub fn from_place_name(name: &str) -> Option<u32> {
        let normalized = normalize_road_name(name);
        normalized
            .split(' ')
            .any(|w| ZONE_WORDS.contains(&w))
            .then_some(ZONE_LIMIT_MPH)
    }
}

impl SpeedLimitTier for GeocodeHeuristic {
    fn source(&self) -> LimitSource {
        LimitSource::Geocoded
    }

    fn needs_road(&self) -> bool {
        true
    }

    fn lookup(&self, query: &TierQuery<'_>) -> Option<SpeedLimitResult> {
        let road = query.road?;

        let by_name = road
            .road_name
            .as_deref()
            .and_then(Self::from_road_name)
            .map(|mph| (mph, Confidence::Medium));

        let by_place = || {
            road.place_name
                .as_deref()
                .and_then(Self::from_place_name)
                .map(|mph| (mph, Confidence::Low))
        };

        let by_class = || {
            road.road_type
                .as_deref()
                .and_then(|t| RoadClass::from_highway_tag(t).typical_limit_mph())
                .map(|mph| (mph, Confidence::Low))
        };

        let (speed_limit_mph, confidence) = by_name.or_else(by_place).or_else(by_class)?;

        Some(SpeedLimitResult {
            speed_limit_mph,
            confidence,
            source: LimitSource::Geocoded,
            road_name: road.road_name.clone(),
            road_type: road.road_type.clone(),
            resolved_at: query.now,
        })
    }
}
