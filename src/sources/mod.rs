pub mod json;

// Indonesian sites
pub mod kiryuu;
pub mod komikcast;
pub mod komiku;
pub mod softkomik;
pub mod westmanga;

// English sites and APIs
pub mod mangabats;
pub mod mangadex;
pub mod weebcentral;
