//! Helpline value to CPIMS code tables.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeTable {
    Sex,
    YesNo,
    EconomicStatus,
    PhysicalCondition,
    MentalCondition,
    OtherCondition,
    RiskLevel,
    CaseReporter,
    FamilyStatus,
    Tribe,
    Religion,
    PerpetratorStatus,
    CaseCategory,
    CaseNature,
    Relationship,
}

const SEX: &[(&str, &str)] = &[("Male", "SMAL"), ("Female", "SFEM"), ("Intersex", "SINT")];

const YES_NO: &[(&str, &str)] = &[("No", "ANNO"), ("Yes", "AYES")];

const ECONOMIC_STATUS: &[(&str, &str)] = &[
    ("High Income (apparent)", "HINC"),
    ("Middle Income (apparent)", "MINC"),
    ("Low Income (apparent)", "LINC"),
    ("Unknown", "UINC"),
];

const PHYSICAL_CONDITION: &[(&str, &str)] = &[
    ("Appears Normal", "PNRM"),
    ("Challenged (unverified)", "PHAU"),
    ("Challenged (verified)", "PHAV"),
];

const MENTAL_CONDITION: &[(&str, &str)] = &[
    ("Appears Normal", "MNRM"),
    ("Challenged (verified)", "MCAV"),
    ("Challenged (unverified)", "MCAU"),
];

const OTHER_CONDITION: &[(&str, &str)] = &[("Appears Normal", "CHNM"), ("Chronic", "CHRO")];

// Priority arrives either as a label or as its order number.
const RISK_LEVEL: &[(&str, &str)] = &[
    ("Low", "RLLW"),
    ("Medium", "RLMD"),
    ("High", "RLHG"),
    ("1", "RLLW"),
    ("2", "RLMD"),
    ("3", "RLHG"),
];

const CASE_REPORTER: &[(&str, &str)] = &[
    ("Self", "CRSF"),
    ("Helpline 116", "CRHE"),
    ("Police", "CRPO"),
    ("Father", "CRFA"),
    ("Mother", "CRMO"),
    ("Court", "CRCO"),
    ("Other relative(s)", "CROR"),
    ("Other non-relative(s)", "CRON"),
    ("Probation", "CRPR"),
    ("Chief", "CRCH"),
    ("Immigration", "CRIM"),
    ("Helpline 1195", "CRHL"),
    ("Service Providers", "CRSP"),
    ("Labour Officers", "CRLO"),
    ("Ministry of Tourism", "CRMT"),
    ("Trade Union", "CRTU"),
    ("Diplomatic missions", "CRDM"),
    ("Other Government agency", "CROG"),
];

const FAMILY_STATUS: &[(&str, &str)] = &[
    ("Caregiver is more than 60 years old", "FSOL"),
    ("Living with biological parents", "CCBP"),
    ("Living with adoptive parents", "CCAP"),
    ("Living in child-headed household (no adult caregiver)", "FSHD"),
    ("Living alone", "FSLA"),
    ("Living with a friend", "FSLF"),
    ("Caregiver is chronically ill", "FSCI"),
    ("Caregiver is disabled", "FSCD"),
    ("Living in children home", "FSCH"),
    ("Living with father only", "CCFO"),
    ("In institution with mother (has child mother)", "RSMI"),
    ("Informal Guardian", "CCIG"),
    ("Living in poor household (destitute)", "FSPH"),
    ("Living on the Street", "CCLS"),
    ("Living with mother only", "CCMO"),
    ("Orphaned - father dead", "FSOF"),
    ("Orphaned - mother dead", "FSOM"),
    ("Other Family", "CCOF"),
];

const TRIBE: &[(&str, &str)] = &[
    ("Kisii", "TRII"),
    ("Kikuyu", "TRKI"),
    ("Luhya", "TRLU"),
    ("Luo", "TRLO"),
    ("American", "TRAM"),
    ("European", "TREU"),
    ("Kalenjin", "TRKE"),
    ("Kamba", "TRKA"),
    ("Kenyan Somali", "TRKS"),
    ("Kuria", "TRKU"),
    ("Maasai", "TRAA"),
    ("Mbeere", "TRMB"),
    ("Meru", "TRME"),
    ("Mijikenda", "TRMJ"),
    ("Nubi", "TRNU"),
    ("Orma", "TROR"),
    ("Pokomo", "TRPO"),
    ("Rendile", "TRRE"),
    ("Swahili", "TRSW"),
    ("Taita", "TRTT"),
];

const RELIGION: &[(&str, &str)] = &[
    ("Christian", "RECH"),
    ("Muslim", "REMU"),
    ("Buddhist", "REBU"),
    ("Atheist", "REAT"),
    ("Other", "REOT"),
];

const PERPETRATOR_STATUS: &[(&str, &str)] = &[
    ("Known", "PKNW"),
    ("Unknown", "PUNK"),
    ("Self", "PSSL"),
    ("Not Applicable", "PSNA"),
];

const CASE_CATEGORY: &[(&str, &str)] = &[
    ("Neglect", "CSIC"),
    ("Defilement", "CCDF"),
    ("Trafficked child / Person", "CSTC"),
    ("Harmful cultural practice", "CSCU"),
    ("Sexual Exploitation and abuse", "CSRG"),
    ("Child Mother", "CLCM"),
    ("Online Abuse", "CCOA"),
    ("Orphaned Child", "CIDC"),
    ("Mother Offer", "CCMO"),
    ("Smuggling", "CSSM"),
    ("Children / Persons on the streets", "CCIP"),
    ("Abandoned", "CDIS"),
    ("Abduction", "CDSA"),
    ("Child Affected by HIV/AIDS", "CLAB"),
    ("Child Delinquency", "CORP"),
    ("Child headed household", "COSR"),
    ("Child Labour", "CTRF"),
    ("Child Marriage", "CCCM"),
];

const CASE_NATURE: &[(&str, &str)] = &[
    ("Chronic/On-going event", "OCGE"),
    ("One-off event", "OOEV"),
    ("Emergency", "OOEM"),
];

const RELATIONSHIP: &[(&str, &str)] = &[
    ("Commercial Drivers", "RCCD"),
    ("Employer", "RCEP"),
    ("Friend", "RCFD"),
    ("Health care worker", "RCHW"),
    ("Local Influentials", "RCLI"),
    ("Neighbour", "RCNB"),
    ("Other non-family", "RCOT"),
    ("Other family member", "ROFM"),
    ("Other Humanitarian Worker", "ROHW"),
    ("Other Primary Care Giver/Guardian", "ROCG"),
    ("Other person in positions of authority", "ROPA"),
    ("Parent", "RCPT"),
    ("Religious Leader", "RCRL"),
    ("Security Guards", "RCSG"),
    ("Security Personnel/Disciplined force member", "RCSP"),
    ("Strangers", "RCST"),
    ("Teacher", "RCTC"),
    ("Tourist", "RCTR"),
    ("Unknown/Not Recorded", "RCUN"),
];

impl CodeTable {
    fn entries(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            CodeTable::Sex => SEX,
            CodeTable::YesNo => YES_NO,
            CodeTable::EconomicStatus => ECONOMIC_STATUS,
            CodeTable::PhysicalCondition => PHYSICAL_CONDITION,
            CodeTable::MentalCondition => MENTAL_CONDITION,
            CodeTable::OtherCondition => OTHER_CONDITION,
            CodeTable::RiskLevel => RISK_LEVEL,
            CodeTable::CaseReporter => CASE_REPORTER,
            CodeTable::FamilyStatus => FAMILY_STATUS,
            CodeTable::Tribe => TRIBE,
            CodeTable::Religion => RELIGION,
            CodeTable::PerpetratorStatus => PERPETRATOR_STATUS,
            CodeTable::CaseCategory => CASE_CATEGORY,
            CodeTable::CaseNature => CASE_NATURE,
            CodeTable::Relationship => RELATIONSHIP,
        }
    }

    /// Exact lookup after stripping the helpline `^` prefix.
    pub fn lookup(&self, value: &str) -> Option<&'static str> {
        let normalized = normalize(value);
        self.entries()
            .iter()
            .find(|(label, _)| *label == normalized)
            .map(|(_, code)| *code)
    }

    /// Mapped code, or the input unchanged when the table has no entry.
    pub fn map(&self, value: &str) -> String {
        self.lookup(value)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string())
    }
}

/// Strips the caret prefix helpline pick-lists put on values (`^Female`).
pub fn normalize(value: &str) -> &str {
    value.trim().trim_start_matches('^').trim()
}
